//! Installation of issued certificates on a device.

use std::sync::Arc;

use eyre::WrapErr as _;

use crate::{
    acme::CertificateMaterial,
    device::{CertKey, DeviceClient, DeviceError},
    request::{Binding, Installation},
};

/// Device directory receiving certificate and key files.
pub const CERTIFICATE_PATH: &str = "/nsconfig/ssl/ACME/";

/// Certkey object holding the device's own management certificate.
pub const DEFAULT_CERTKEY: &str = "ns-server-certificate";

/// Installs certificates on one device.
pub struct Installer {
    device: Arc<dyn DeviceClient>,
    timestamp: String,
}

impl Installer {
    pub fn new(device: Arc<dyn DeviceClient>, timestamp: &str) -> Self {
        Installer {
            device,
            timestamp: timestamp.to_owned(),
        }
    }

    pub fn certkey_name(request: &str) -> String {
        format!("ACME_{request}")
    }

    fn certificate_file(&self, request: &str) -> String {
        format!("{request}_{}.cer", self.timestamp)
    }

    fn key_file(&self, request: &str) -> String {
        format!("{request}_{}.key", self.timestamp)
    }

    /// Runs one installation entry: upload, certkey create-or-update (or default certificate
    /// replacement), missing bindings, save.
    pub async fn install(
        &self,
        request: &str,
        material: &CertificateMaterial,
        installation: &Installation,
    ) -> eyre::Result<()> {
        let target = &installation.target;
        log::info!("installing certificate request={request} target={target}");

        let certkey = CertKey {
            name: Self::certkey_name(request),
            cert: format!("{CERTIFICATE_PATH}{}", self.certificate_file(request)),
            key: format!("{CERTIFICATE_PATH}{}", self.key_file(request)),
        };

        self.upload(&self.certificate_file(request), material.certificate.as_bytes())
            .await?;
        self.upload(&self.key_file(request), material.private_key.as_bytes())
            .await?;

        if installation.replace_default_certificate {
            log::info!("replacing default certificate target={target}");

            self.device
                .update_certkey(&CertKey {
                    name: DEFAULT_CERTKEY.to_owned(),
                    ..certkey
                })
                .await
                .wrap_err("failed to replace default certificate")?;
        } else {
            self.configure_certkey(&certkey).await?;
            self.bind_vservers(&certkey.name, &installation.ssl_virtual_servers)
                .await?;
            self.bind_services(&certkey.name, &installation.ssl_services)
                .await?;
        }

        self.device
            .save_config()
            .await
            .wrap_err("failed to save running configuration")?;

        log::info!("installed certificate request={request} target={target}");

        Ok(())
    }

    async fn upload(&self, file_name: &str, content: &[u8]) -> eyre::Result<()> {
        log::debug!("uploading file={CERTIFICATE_PATH}{file_name} device={}", self.device.name());

        match self.device.delete_file(CERTIFICATE_PATH, file_name).await {
            Err(err) if !err.is_not_found() => {
                return Err(err).wrap_err_with(|| format!("failed to replace file {file_name}"));
            }
            _ => {}
        }

        self.device
            .upload_file(CERTIFICATE_PATH, file_name, content)
            .await
            .wrap_err_with(|| format!("failed to upload file {file_name}"))
    }

    async fn configure_certkey(&self, certkey: &CertKey) -> eyre::Result<()> {
        match self.device.get_certkey(&certkey.name).await {
            Ok(_) => {
                log::debug!("updating certkey={}", certkey.name);
                self.device
                    .update_certkey(certkey)
                    .await
                    .wrap_err_with(|| format!("failed to update certkey {}", certkey.name))
            }

            Err(DeviceError::NotFound(_)) => {
                log::debug!("adding certkey={}", certkey.name);
                self.device
                    .add_certkey(certkey)
                    .await
                    .wrap_err_with(|| format!("failed to add certkey {}", certkey.name))
            }

            Err(err) => {
                Err(err).wrap_err_with(|| format!("failed to look up certkey {}", certkey.name))
            }
        }
    }

    async fn bind_vservers(&self, certkey: &str, bindings: &[Binding]) -> eyre::Result<()> {
        if bindings.is_empty() {
            return Ok(());
        }

        let bound = self
            .device
            .certkey_vserver_bindings(certkey)
            .await
            .wrap_err_with(|| format!("failed to list vserver bindings of {certkey}"))?;

        for binding in bindings {
            if bound.contains(&binding.name) {
                log::debug!("certkey={certkey} already bound to vserver={}", binding.name);
                continue;
            }

            self.device
                .bind_certkey_vserver(&binding.name, certkey, binding.sni_enabled)
                .await
                .wrap_err_with(|| format!("failed to bind {certkey} to vserver {}", binding.name))?;
        }

        Ok(())
    }

    async fn bind_services(&self, certkey: &str, bindings: &[Binding]) -> eyre::Result<()> {
        if bindings.is_empty() {
            return Ok(());
        }

        let bound = self
            .device
            .certkey_service_bindings(certkey)
            .await
            .wrap_err_with(|| format!("failed to list service bindings of {certkey}"))?;

        for binding in bindings {
            if bound.contains(&binding.name) {
                log::debug!("certkey={certkey} already bound to service={}", binding.name);
                continue;
            }

            self.device
                .bind_certkey_service(&binding.name, certkey, binding.sni_enabled)
                .await
                .wrap_err_with(|| format!("failed to bind {certkey} to service {}", binding.name))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        request::Target,
        test::{certificate_material, FakeDevice},
    };

    fn installation() -> Installation {
        Installation {
            target: Target::new("o", "prod"),
            replace_default_certificate: false,
            ssl_virtual_servers: vec![
                Binding {
                    name: "vs-www".to_owned(),
                    sni_enabled: true,
                },
                Binding {
                    name: "vs-api".to_owned(),
                    sni_enabled: false,
                },
            ],
            ssl_services: vec![Binding {
                name: "svc-www".to_owned(),
                sni_enabled: false,
            }],
        }
    }

    #[tokio::test]
    async fn second_install_updates_in_place() {
        let device = Arc::new(FakeDevice::default());
        let installer = Installer::new(device.clone(), "20240102030405");
        let material = certificate_material("www.example.com");

        installer.install("www", &material, &installation()).await.unwrap();
        installer.install("www", &material, &installation()).await.unwrap();

        let counts = device.counts();
        assert_eq!(counts.add_certkey, 1);
        assert_eq!(counts.update_certkey, 1);
        assert_eq!(counts.save_config, 2);

        assert_eq!(device.vserver_bindings("ACME_www"), ["vs-api", "vs-www"]);
        assert_eq!(device.service_bindings("ACME_www"), ["svc-www"]);

        let certkey = device.certkey("ACME_www").unwrap();
        assert_eq!(certkey.cert, "/nsconfig/ssl/ACME/www_20240102030405.cer");
        assert_eq!(certkey.key, "/nsconfig/ssl/ACME/www_20240102030405.key");

        let cert = device.file(CERTIFICATE_PATH, "www_20240102030405.cer").unwrap();
        assert_eq!(cert, material.certificate.as_bytes());
    }

    #[tokio::test]
    async fn replacing_default_certificate_skips_bindings() {
        let device = Arc::new(FakeDevice::default());
        device.add_certkey(&CertKey {
            name: DEFAULT_CERTKEY.to_owned(),
            cert: "ns-server.cert".to_owned(),
            key: "ns-server.key".to_owned(),
        })
        .await
        .unwrap();

        let installer = Installer::new(device.clone(), "20240102030405");
        let installation = Installation {
            replace_default_certificate: true,
            ..installation()
        };

        installer
            .install("mgmt", &certificate_material("mgmt.example.com"), &installation)
            .await
            .unwrap();

        let certkey = device.certkey(DEFAULT_CERTKEY).unwrap();
        assert_eq!(certkey.cert, "/nsconfig/ssl/ACME/mgmt_20240102030405.cer");
        assert!(device.certkey("ACME_mgmt").is_none());
        assert!(device.vserver_bindings("ACME_mgmt").is_empty());
        assert_eq!(device.counts().save_config, 1);
    }
}
