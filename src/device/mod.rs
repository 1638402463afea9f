//! Device management primitives.
//!
//! [`DeviceClient`] is the set of remote calls the providers and the installer rely on.
//! [`NitroClient`] implements it against the NetScaler ADC NITRO REST API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

mod nitro;

pub use self::nitro::NitroClient;

/// Failure of a device call.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The addressed resource does not exist.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// The device rejected the call.
    #[error("device error {code}: {message}")]
    Nitro { code: i64, message: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("unexpected device response: {0}")]
    Decode(String),
}

impl DeviceError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DeviceError::NotFound(_))
    }
}

/// Stored certificate/key pair object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertKey {
    #[serde(rename = "certkey")]
    pub name: String,

    /// Certificate file name, relative to the device's certificate directory or absolute.
    pub cert: String,

    /// Private key file name.
    pub key: String,
}

/// Responder action answering with a canned response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponderAction {
    pub name: String,

    #[serde(rename = "type")]
    pub action_type: String,

    /// Expression producing the response.
    pub target: String,
}

/// Responder policy tying a rule to an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponderPolicy {
    pub name: String,
    pub rule: String,
    pub action: String,
}

/// One TXT record set as held by the device's authoritative DNS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxtRecord {
    pub domain: String,
    pub values: Vec<String>,
    pub record_id: u64,
}

/// Remote calls against one device.
///
/// Every call returns [`DeviceError::NotFound`] when the addressed object does not exist.
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// Name of the device, for logging.
    fn name(&self) -> &str;

    async fn upload_file(
        &self,
        location: &str,
        file_name: &str,
        content: &[u8],
    ) -> Result<(), DeviceError>;

    async fn delete_file(&self, location: &str, file_name: &str) -> Result<(), DeviceError>;

    async fn get_certkey(&self, name: &str) -> Result<CertKey, DeviceError>;

    async fn add_certkey(&self, certkey: &CertKey) -> Result<(), DeviceError>;

    /// Replaces the files of an existing certkey without checking domain names.
    async fn update_certkey(&self, certkey: &CertKey) -> Result<(), DeviceError>;

    /// Names of virtual servers `certkey` is bound to.
    async fn certkey_vserver_bindings(&self, certkey: &str) -> Result<Vec<String>, DeviceError>;

    async fn bind_certkey_vserver(
        &self,
        vserver: &str,
        certkey: &str,
        sni: bool,
    ) -> Result<(), DeviceError>;

    /// Names of services `certkey` is bound to.
    async fn certkey_service_bindings(&self, certkey: &str) -> Result<Vec<String>, DeviceError>;

    async fn bind_certkey_service(
        &self,
        service: &str,
        certkey: &str,
        sni: bool,
    ) -> Result<(), DeviceError>;

    async fn add_responder_action(&self, action: &ResponderAction) -> Result<(), DeviceError>;

    async fn delete_responder_action(&self, name: &str) -> Result<(), DeviceError>;

    async fn add_responder_policy(&self, policy: &ResponderPolicy) -> Result<(), DeviceError>;

    async fn delete_responder_policy(&self, name: &str) -> Result<(), DeviceError>;

    /// Priorities in use at the global `REQ_OVERRIDE` responder bind point.
    async fn global_responder_priorities(&self) -> Result<Vec<u32>, DeviceError>;

    /// Binds `policy` globally at `REQ_OVERRIDE`, ending evaluation when it matches.
    async fn bind_global_responder_policy(
        &self,
        policy: &str,
        priority: u32,
    ) -> Result<(), DeviceError>;

    async fn unbind_global_responder_policy(&self, policy: &str) -> Result<(), DeviceError>;

    async fn add_txt_record(&self, fqdn: &str, value: &str, ttl: u32) -> Result<(), DeviceError>;

    async fn txt_records(&self, fqdn: &str) -> Result<Vec<TxtRecord>, DeviceError>;

    async fn delete_txt_record(&self, fqdn: &str, record_id: u64) -> Result<(), DeviceError>;

    /// Persists the running configuration.
    async fn save_config(&self) -> Result<(), DeviceError>;
}
