use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::*;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use serde_json::{json, Value};
use zeroize::Zeroizing;

use super::{CertKey, DeviceClient, DeviceError, ResponderAction, ResponderPolicy, TxtRecord};
use crate::config::{Connection, Credentials, Endpoint};

/// NITRO error codes meaning the addressed resource does not exist.
const NOT_FOUND_CODES: [i64; 2] = [258, 1540];

const BIND_TYPE: &str = "REQ_OVERRIDE";

/// Characters left as-is in path segments and argument values.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

fn encode(value: &str) -> String {
    utf8_percent_encode(value, COMPONENT).to_string()
}

/// [`DeviceClient`] for NetScaler ADC over the NITRO REST API (`/nitro/v1/config`).
pub struct NitroClient {
    name: String,
    base_url: String,
    username: String,
    password: Zeroizing<String>,
    http: reqwest::Client,
}

impl std::fmt::Debug for NitroClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NitroClient")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl NitroClient {
    pub fn new(
        endpoint: &Endpoint,
        credentials: &Credentials,
        connection: &Connection,
    ) -> Result<Self, DeviceError> {
        let scheme = if connection.use_ssl { "https" } else { "http" };

        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!connection.validate_server_certificate)
            .timeout(Duration::from_millis(connection.timeout))
            .build()?;

        Ok(NitroClient {
            name: endpoint.name.clone(),
            base_url: format!("{scheme}://{}/nitro/v1/config", endpoint.address),
            username: credentials.username.clone(),
            password: Zeroizing::new(credentials.password.clone()),
            http,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        log::debug!("nitro device={} {method} {path}", self.name);

        self.http
            .request(method, format!("{}/{path}", self.base_url))
            .header("X-NITRO-USER", &self.username)
            .header("X-NITRO-PASS", self.password.as_str())
    }

    async fn send(&self, req: RequestBuilder) -> Result<Value, DeviceError> {
        let res = req.send().await?;
        let status = res.status();
        let body = res.text().await?;

        let value = if body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str::<Value>(&body)
                .map_err(|err| DeviceError::Decode(format!("{err}: {body}")))?
        };

        let code = value.get("errorcode").and_then(Value::as_i64).unwrap_or(0);
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();

        if NOT_FOUND_CODES.contains(&code) || status == StatusCode::NOT_FOUND {
            return Err(DeviceError::NotFound(message));
        }

        if code != 0 || !status.is_success() {
            return Err(DeviceError::Nitro {
                code: if code != 0 { code } else { i64::from(status.as_u16()) },
                message,
            });
        }

        Ok(value)
    }

    async fn send_json(&self, method: Method, path: &str, body: Value) -> Result<(), DeviceError> {
        self.send(self.request(method, path).json(&body)).await?;
        Ok(())
    }

    /// Reads the array held under `resource` in a GET response; absent means empty.
    async fn get_list<T: DeserializeOwned>(
        &self,
        path: &str,
        resource: &str,
    ) -> Result<Vec<T>, DeviceError> {
        let mut value = self.send(self.request(Method::GET, path)).await?;

        match value.get_mut(resource).map(Value::take) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(list) => serde_json::from_value(list)
                .map_err(|err| DeviceError::Decode(format!("{resource}: {err}"))),
        }
    }
}

/// NITRO renders most numbers as strings.
fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| serde::de::Error::custom(format!("invalid number {n}"))),
        Value::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
        other => Err(serde::de::Error::custom(format!("expected number, got {other}"))),
    }
}

#[derive(Deserialize)]
struct VserverBinding {
    servername: String,
}

#[derive(Deserialize)]
struct ServiceBinding {
    servicename: String,
}

#[derive(Deserialize)]
struct PriorityBinding {
    #[serde(deserialize_with = "lenient_u64")]
    priority: u64,
}

#[derive(Deserialize)]
struct DnsTxtRec {
    domain: String,

    #[serde(rename = "String", alias = "string", default)]
    values: Vec<String>,

    #[serde(deserialize_with = "lenient_u64")]
    recordid: u64,
}

#[async_trait]
impl DeviceClient for NitroClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upload_file(
        &self,
        location: &str,
        file_name: &str,
        content: &[u8],
    ) -> Result<(), DeviceError> {
        let body = json!({
            "systemfile": {
                "filename": file_name,
                "filelocation": location,
                "filecontent": BASE64_STANDARD.encode(content),
                "fileencoding": "BASE64",
            }
        });
        self.send_json(Method::POST, "systemfile", body).await
    }

    async fn delete_file(&self, location: &str, file_name: &str) -> Result<(), DeviceError> {
        let path = format!(
            "systemfile/{}?args=filelocation:{}",
            encode(file_name),
            encode(location)
        );
        self.send(self.request(Method::DELETE, &path)).await?;
        Ok(())
    }

    async fn get_certkey(&self, name: &str) -> Result<CertKey, DeviceError> {
        let path = format!("sslcertkey/{}?attrs=certkey,cert,key", encode(name));
        self.get_list::<CertKey>(&path, "sslcertkey")
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DeviceError::NotFound(format!("sslcertkey {name}")))
    }

    async fn add_certkey(&self, certkey: &CertKey) -> Result<(), DeviceError> {
        self.send_json(Method::POST, "sslcertkey", json!({ "sslcertkey": certkey }))
            .await
    }

    async fn update_certkey(&self, certkey: &CertKey) -> Result<(), DeviceError> {
        let body = json!({
            "sslcertkey": {
                "certkey": certkey.name,
                "cert": certkey.cert,
                "key": certkey.key,
                "nodomaincheck": true,
            }
        });
        self.send_json(Method::POST, "sslcertkey?action=update", body)
            .await
    }

    async fn certkey_vserver_bindings(&self, certkey: &str) -> Result<Vec<String>, DeviceError> {
        let path = format!("sslcertkey_sslvserver_binding/{}", encode(certkey));
        match self
            .get_list::<VserverBinding>(&path, "sslcertkey_sslvserver_binding")
            .await
        {
            Ok(bindings) => Ok(bindings.into_iter().map(|b| b.servername).collect()),
            Err(err) if err.is_not_found() => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    async fn bind_certkey_vserver(
        &self,
        vserver: &str,
        certkey: &str,
        sni: bool,
    ) -> Result<(), DeviceError> {
        let body = json!({
            "sslvserver_sslcertkey_binding": {
                "vservername": vserver,
                "certkeyname": certkey,
                "snicert": sni,
            }
        });
        self.send_json(Method::PUT, "sslvserver_sslcertkey_binding", body)
            .await
    }

    async fn certkey_service_bindings(&self, certkey: &str) -> Result<Vec<String>, DeviceError> {
        let path = format!("sslcertkey_service_binding/{}", encode(certkey));
        match self
            .get_list::<ServiceBinding>(&path, "sslcertkey_service_binding")
            .await
        {
            Ok(bindings) => Ok(bindings.into_iter().map(|b| b.servicename).collect()),
            Err(err) if err.is_not_found() => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    async fn bind_certkey_service(
        &self,
        service: &str,
        certkey: &str,
        sni: bool,
    ) -> Result<(), DeviceError> {
        let body = json!({
            "sslservice_sslcertkey_binding": {
                "servicename": service,
                "certkeyname": certkey,
                "snicert": sni,
            }
        });
        self.send_json(Method::PUT, "sslservice_sslcertkey_binding", body)
            .await
    }

    async fn add_responder_action(&self, action: &ResponderAction) -> Result<(), DeviceError> {
        self.send_json(
            Method::POST,
            "responderaction",
            json!({ "responderaction": action }),
        )
        .await
    }

    async fn delete_responder_action(&self, name: &str) -> Result<(), DeviceError> {
        let path = format!("responderaction/{}", encode(name));
        self.send(self.request(Method::DELETE, &path)).await?;
        Ok(())
    }

    async fn add_responder_policy(&self, policy: &ResponderPolicy) -> Result<(), DeviceError> {
        self.send_json(
            Method::POST,
            "responderpolicy",
            json!({ "responderpolicy": policy }),
        )
        .await
    }

    async fn delete_responder_policy(&self, name: &str) -> Result<(), DeviceError> {
        let path = format!("responderpolicy/{}", encode(name));
        self.send(self.request(Method::DELETE, &path)).await?;
        Ok(())
    }

    async fn global_responder_priorities(&self) -> Result<Vec<u32>, DeviceError> {
        let path =
            format!("responderglobal_responderpolicy_binding?args=type:{BIND_TYPE}&attrs=priority");

        let bindings = match self
            .get_list::<PriorityBinding>(&path, "responderglobal_responderpolicy_binding")
            .await
        {
            Err(err) if err.is_not_found() => Vec::new(),
            other => other?,
        };

        bindings
            .into_iter()
            .map(|b| {
                u32::try_from(b.priority)
                    .map_err(|_| DeviceError::Decode(format!("priority {} out of range", b.priority)))
            })
            .collect()
    }

    async fn bind_global_responder_policy(
        &self,
        policy: &str,
        priority: u32,
    ) -> Result<(), DeviceError> {
        let body = json!({
            "responderglobal_responderpolicy_binding": {
                "policyname": policy,
                "priority": priority,
                "type": BIND_TYPE,
                "gotopriorityexpression": "END",
            }
        });
        self.send_json(Method::PUT, "responderglobal_responderpolicy_binding", body)
            .await
    }

    async fn unbind_global_responder_policy(&self, policy: &str) -> Result<(), DeviceError> {
        let path = format!(
            "responderglobal_responderpolicy_binding?args=policyname:{},type:{BIND_TYPE}",
            encode(policy)
        );
        self.send(self.request(Method::DELETE, &path)).await?;
        Ok(())
    }

    async fn add_txt_record(&self, fqdn: &str, value: &str, ttl: u32) -> Result<(), DeviceError> {
        let body = json!({
            "dnstxtrec": {
                "domain": fqdn,
                "String": [value],
                "ttl": ttl,
            }
        });
        self.send_json(Method::POST, "dnstxtrec", body).await
    }

    async fn txt_records(&self, fqdn: &str) -> Result<Vec<TxtRecord>, DeviceError> {
        let path = format!("dnstxtrec/{}?attrs=string,recordid", encode(fqdn));

        let records = match self.get_list::<DnsTxtRec>(&path, "dnstxtrec").await {
            Err(err) if err.is_not_found() => Vec::new(),
            other => other?,
        };

        Ok(records
            .into_iter()
            .map(|rec| TxtRecord {
                domain: rec.domain,
                values: rec.values,
                record_id: rec.recordid,
            })
            .collect())
    }

    async fn delete_txt_record(&self, fqdn: &str, record_id: u64) -> Result<(), DeviceError> {
        let path = format!("dnstxtrec/{}?args=recordid:{record_id}", encode(fqdn));
        self.send(self.request(Method::DELETE, &path)).await?;
        Ok(())
    }

    async fn save_config(&self) -> Result<(), DeviceError> {
        self.send_json(Method::POST, "nsconfig?action=save", json!({ "nsconfig": {} }))
            .await
    }
}
