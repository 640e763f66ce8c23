pub mod amqp_consumer;
pub mod qms_client;

pub use amqp_consumer::{AmqpAdapter, Delivery, UpdateHandler, UsageConsumer};
pub use qms_client::QmsForwarder;
