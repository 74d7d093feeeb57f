use crate::publisher::OutboundClient;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{BaseProducer, BaseRecord, Producer};
use rdkafka::util::Timeout;

/// Kafka-backed outbound client. Each publish is flushed within a bounded
/// timeout.
pub struct KafkaOutboundClient {
    producer: BaseProducer,
    flush_timeout: std::time::Duration,
}

impl KafkaOutboundClient {
    pub fn new(brokers: &str, flush_timeout: std::time::Duration) -> Result<Self, String> {
        let producer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create::<BaseProducer>()
            .map_err(|e| e.to_string())?;
        Ok(Self {
            producer,
            flush_timeout,
        })
    }
}

impl OutboundClient for KafkaOutboundClient {
    fn publish(&mut self, topic: &str, key: &str, payload: &str) -> Result<(), String> {
        self.producer
            .send(BaseRecord::to(topic).payload(payload).key(key))
            .map_err(|(e, _)| e.to_string())?;
        self.producer
            .flush(Timeout::After(self.flush_timeout))
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}
