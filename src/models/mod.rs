use serde::{Deserialize, Serialize};

/// A resource usage update received from the AMQP queue
///
/// `value` stays a string at this layer; numeric parsing is the handler's
/// responsibility since validation rules vary by deployment. `user_id` and
/// `username` are optional depending on the deployment generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageUpdate {
    pub attribute: String,
    pub value: String,
    pub unit: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub username: String,
}

/// The request body sent to QMS for every forwarded usage update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QmsUsageRequest {
    pub username: String,
    pub resource_name: String,
    pub usage_value: f64,
    pub update_type: String,
}
