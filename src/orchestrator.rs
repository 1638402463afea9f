//! Request orchestration.
//!
//! A batch runs as a two-stage pipeline:
//!
//! 1. one provider worker per challenge provider obtains certificates for the requests queued to
//!    it, one after the other;
//! 2. one installation worker per target installs every certificate forwarded to it.
//!
//! Queues are bounded by the number of items a pre-pass counted for them, so producers never
//! wait on capacity. Failures of a request go to a single error sink and never stop other
//! requests.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use eyre::{eyre, WrapErr as _};
use time::{macros::format_description, OffsetDateTime};
use tokio::{sync::mpsc, task::JoinSet};

use crate::{
    account::AccountRegistry,
    acme::{AcmeClient, CertificateAuthority, CertificateMaterial, ChallengeType, ObtainRequest},
    config::AppConfig,
    error::{BatchReport, ConfigError, Installed, RequestFailure, Stage},
    install::Installer,
    loader, params,
    provider::{DnsSolvers, Http01Server, ProviderFactory, ProviderKind},
    registry::{ConfiguredRegistry, DeviceRegistry},
    request::{CertificateRequest, Target},
};

/// Queue sizes of a batch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Requests per challenge provider.
    pub provider_queues: BTreeMap<String, usize>,

    /// Installation entries per target.
    pub target_queues: BTreeMap<Target, usize>,
}

impl Plan {
    fn add(&mut self, request: &CertificateRequest) {
        *self
            .provider_queues
            .entry(request.provider().to_owned())
            .or_default() += 1;

        for installation in &request.installation {
            *self
                .target_queues
                .entry(installation.target.clone())
                .or_default() += 1;
        }
    }
}

/// Certificate on its way to installation.
struct Issued {
    request: CertificateRequest,
    material: CertificateMaterial,
}

/// Shared state of one batch run.
struct Context {
    config: Arc<AppConfig>,
    accounts: Arc<AccountRegistry>,
    registry: Arc<dyn DeviceRegistry>,
    authority: Arc<dyn CertificateAuthority>,
    providers: ProviderFactory,
    timestamp: String,
}

type ErrorSink = mpsc::UnboundedSender<RequestFailure>;

pub struct Orchestrator {
    config: Arc<AppConfig>,
    requests: BTreeMap<String, CertificateRequest>,
    accounts: Arc<AccountRegistry>,
    registry: Arc<dyn DeviceRegistry>,
    authority: Arc<dyn CertificateAuthority>,
    dns: Arc<DnsSolvers>,
    http01: Arc<Http01Server>,
}

impl Orchestrator {
    pub fn new(
        config: AppConfig,
        requests: BTreeMap<String, CertificateRequest>,
        registry: Arc<dyn DeviceRegistry>,
        authority: Arc<dyn CertificateAuthority>,
    ) -> Result<Self, ConfigError> {
        let accounts = AccountRegistry::new(&config.users)?;
        let http01 = Http01Server::new(&config.acme.http_listen_address);

        Ok(Orchestrator {
            config: Arc::new(config),
            requests,
            accounts: Arc::new(accounts),
            registry,
            authority,
            dns: Arc::new(DnsSolvers::with_builtin()),
            http01: Arc::new(http01),
        })
    }

    /// Orchestrator over the requests under the configured request directory, NITRO device
    /// clients and an ACME client.
    pub fn from_config(config: AppConfig) -> eyre::Result<Self> {
        let requests = loader::load_requests(&config.config_path)?;
        log::info!(
            "loaded {} requests from {}",
            requests.len(),
            config.config_path.display()
        );

        let registry = ConfiguredRegistry::from_config(&config)?;
        let authority = AcmeClient::new()?;

        Ok(Self::new(
            config,
            requests,
            Arc::new(registry),
            Arc::new(authority),
        )?)
    }

    /// Replaces the table of named DNS-01 solvers.
    pub fn with_dns_solvers(mut self, dns: DnsSolvers) -> Self {
        self.dns = Arc::new(dns);
        self
    }

    pub fn requests(&self) -> impl Iterator<Item = &CertificateRequest> {
        self.requests.values()
    }

    /// Runs the request called `name`.
    pub async fn request_one(&self, name: &str) -> eyre::Result<BatchReport> {
        let request = self
            .requests
            .get(name)
            .ok_or_else(|| eyre!("unknown request {name}"))?;

        self.run(vec![request]).await
    }

    /// Runs every loaded request.
    pub async fn request_all(&self) -> eyre::Result<BatchReport> {
        self.run(self.requests.values().collect()).await
    }

    /// Queue sizes a run of every valid request would use.
    pub fn plan(&self) -> Plan {
        self.prepare(self.requests.values().collect()).0
    }

    /// Checks everything a request refers to before any work starts.
    fn validate(&self, request: &CertificateRequest) -> Result<(), ConfigError> {
        let acme = &request.request;

        if !self.accounts.contains(&acme.user) {
            return Err(ConfigError::UnknownUser(acme.user.clone()));
        }

        self.config.service_url(&acme.challenge.service)?;

        if !acme.key_type.is_supported() {
            return Err(ConfigError::UnsupportedKeyType(acme.key_type.to_string()));
        }

        let kind = ProviderKind::select(&acme.challenge, &self.dns)?;

        if kind.is_device_bound() {
            let target = acme.target.as_ref().ok_or_else(|| {
                ConfigError::Invalid(format!("provider {kind} needs request.target"))
            })?;
            self.registry.primary_client(target)?;
        }

        if let Some(name) = &acme.challenge.provider_parameters {
            self.config.parameters(name)?;
        }

        if acme.content.domains().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "request {} names no domains",
                request.name
            )));
        }

        for target in request.targets() {
            self.registry.primary_client(target)?;
        }

        Ok(())
    }

    fn prepare(
        &self,
        selected: Vec<&CertificateRequest>,
    ) -> (Plan, Vec<CertificateRequest>, Vec<RequestFailure>) {
        let mut plan = Plan::default();
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();

        for request in selected {
            match self.validate(request) {
                Ok(()) => {
                    plan.add(request);
                    accepted.push(request.clone());
                }

                Err(err) => rejected.push(RequestFailure {
                    request: request.name.clone(),
                    stage: Stage::Configuration,
                    target: None,
                    error: err.into(),
                }),
            }
        }

        (plan, accepted, rejected)
    }

    async fn run(&self, selected: Vec<&CertificateRequest>) -> eyre::Result<BatchReport> {
        let timestamp = run_timestamp()?;
        let (plan, accepted, rejected) = self.prepare(selected);

        log::info!(
            "starting batch timestamp={timestamp} requests={} rejected={} providers={} targets={}",
            accepted.len(),
            rejected.len(),
            plan.provider_queues.len(),
            plan.target_queues.len()
        );

        let ctx = Arc::new(Context {
            config: Arc::clone(&self.config),
            accounts: Arc::clone(&self.accounts),
            registry: Arc::clone(&self.registry),
            authority: Arc::clone(&self.authority),
            providers: ProviderFactory {
                timestamp: timestamp.clone(),
                max_retries: self.config.acme.max_retries,
                http01: Arc::clone(&self.http01),
                dns: Arc::clone(&self.dns),
            },
            timestamp,
        });

        let (errors, error_rx) = mpsc::unbounded_channel();
        let sink = tokio::spawn(collect_failures(error_rx));

        for failure in rejected {
            report(&errors, failure);
        }

        let mut installers = JoinSet::new();
        let mut target_queues = HashMap::new();

        for (target, size) in &plan.target_queues {
            let (tx, rx) = mpsc::channel(*size);
            target_queues.insert(target.clone(), tx);
            installers.spawn(installation_worker(
                Arc::clone(&ctx),
                target.clone(),
                rx,
                errors.clone(),
            ));
        }

        let target_queues = Arc::new(target_queues);

        let mut providers = JoinSet::new();
        let mut provider_queues = HashMap::new();

        for (provider, size) in &plan.provider_queues {
            let (tx, rx) = mpsc::channel(*size);
            provider_queues.insert(provider.clone(), tx);
            providers.spawn(provider_worker(
                Arc::clone(&ctx),
                provider.clone(),
                rx,
                Arc::clone(&target_queues),
                errors.clone(),
            ));
        }

        // installation queues close once the last provider worker is done
        drop(target_queues);

        for request in accepted {
            let Some(queue) = provider_queues.get(request.provider()) else {
                continue;
            };

            if let Err(mpsc::error::SendError(request)) = queue.send(request).await {
                report(
                    &errors,
                    RequestFailure {
                        request: request.name.clone(),
                        stage: Stage::Issuance,
                        target: None,
                        error: eyre!("provider worker {} stopped", request.provider()),
                    },
                );
            }
        }

        drop(provider_queues);

        let mut issued = Vec::new();
        while let Some(res) = providers.join_next().await {
            match res {
                Ok(names) => issued.extend(names),
                Err(err) => log::error!("provider worker failed: {err}"),
            }
        }

        let mut installed = Vec::new();
        while let Some(res) = installers.join_next().await {
            match res {
                Ok(done) => installed.extend(done),
                Err(err) => log::error!("installation worker failed: {err}"),
            }
        }

        drop(errors);
        let failures = sink.await.wrap_err("error sink failed")?;

        issued.sort();
        installed.sort_by(|a, b| {
            (&a.request, &a.target).cmp(&(&b.request, &b.target))
        });

        log::info!(
            "batch finished issued={} installed={} failed={}",
            issued.len(),
            installed.len(),
            failures.len()
        );

        Ok(BatchReport {
            issued,
            installed,
            failures,
        })
    }
}

/// `YYYYMMDDhhmmss` in UTC.
fn run_timestamp() -> eyre::Result<String> {
    let format = format_description!("[year][month][day][hour][minute][second]");
    Ok(OffsetDateTime::now_utc().format(format)?)
}

fn report(errors: &ErrorSink, failure: RequestFailure) {
    if let Err(mpsc::error::SendError(failure)) = errors.send(failure) {
        log::error!("request failed (sink closed) {failure}");
    }
}

async fn collect_failures(mut rx: mpsc::UnboundedReceiver<RequestFailure>) -> Vec<RequestFailure> {
    let mut failures = Vec::new();

    while let Some(failure) = rx.recv().await {
        log::error!("request failed {failure}");
        failures.push(failure);
    }

    failures
}

async fn provider_worker(
    ctx: Arc<Context>,
    provider: String,
    mut rx: mpsc::Receiver<CertificateRequest>,
    target_queues: Arc<HashMap<Target, mpsc::Sender<Arc<Issued>>>>,
    errors: ErrorSink,
) -> Vec<String> {
    let mut issued = Vec::new();

    while let Some(request) = rx.recv().await {
        log::info!("obtaining certificate request={} provider={provider}", request.name);

        let material = match obtain(&ctx, &request).await {
            Ok(material) => material,
            Err(error) => {
                let stage = if error.downcast_ref::<ConfigError>().is_some() {
                    Stage::Configuration
                } else {
                    Stage::Issuance
                };

                report(
                    &errors,
                    RequestFailure {
                        request: request.name.clone(),
                        stage,
                        target: None,
                        error,
                    },
                );
                continue;
            }
        };

        match material.valid_days_left() {
            Ok(days) => log::info!(
                "issued certificate request={} domain={} valid_days={days}",
                request.name,
                material.domain
            ),
            Err(err) => log::warn!(
                "issued certificate request={} domain={} with unreadable validity: {err}",
                request.name,
                material.domain
            ),
        }
        issued.push(request.name.clone());

        let certificate = Arc::new(Issued { request, material });

        for target in certificate.request.targets() {
            let sent = match target_queues.get(target) {
                Some(queue) => queue.send(Arc::clone(&certificate)).await.is_ok(),
                None => false,
            };

            if !sent {
                report(
                    &errors,
                    RequestFailure {
                        request: certificate.request.name.clone(),
                        stage: Stage::Installation,
                        target: Some(target.clone()),
                        error: eyre!("no installation worker for {target}"),
                    },
                );
            }
        }
    }

    log::debug!("provider worker {provider} done");

    issued
}

/// Obtains the certificate of one request with the provider it names.
async fn obtain(ctx: &Context, request: &CertificateRequest) -> eyre::Result<CertificateMaterial> {
    let acme = &request.request;
    let spec = &acme.challenge;

    let kind = ProviderKind::select(spec, &ctx.providers.dns)?;
    let directory_url = ctx.config.service_url(&spec.service)?;

    let account = ctx.accounts.account_for(&acme.user).await?;
    let registration = ctx
        .accounts
        .get_or_register(&account, &directory_url, ctx.authority.as_ref())
        .await?;

    // held until the exchange is over
    let applied = match &spec.provider_parameters {
        Some(name) => Some(params::apply(ctx.config.parameters(name)?).await),
        None => None,
    };

    let device = match (kind.is_device_bound(), &acme.target) {
        (false, _) => None,
        (true, Some(target)) => Some(ctx.registry.primary_client(target)?),
        (true, None) => {
            return Err(ConfigError::Invalid(format!("provider {kind} needs request.target")).into())
        }
    };

    let solver = match (&kind, &applied) {
        // named solvers configure themselves from the environment
        (ProviderKind::Dns(_), None) => {
            let _env = params::unchanged().await;
            ctx.providers.build(&kind, device)?
        }
        _ => ctx.providers.build(&kind, device)?,
    };
    let domains = acme.content.domains();

    let dns_propagation_delay = (spec.challenge_type == ChallengeType::Dns01
        && !spec.disable_dns_propagation_check)
        .then(|| ctx.config.acme.dns_propagation_delay());

    ctx.authority
        .obtain(ObtainRequest {
            directory_url: &directory_url,
            account_key: account.key(),
            registration: &registration,
            domains: &domains,
            key_type: acme.key_type,
            solver: solver.as_ref(),
            timeout: Duration::from_secs(acme.timeout),
            dns_propagation_delay,
            poll_interval: ctx.config.acme.poll_interval(),
        })
        .await
        .wrap_err_with(|| format!("failed to obtain certificate for {}", request.name))
}

async fn installation_worker(
    ctx: Arc<Context>,
    target: Target,
    mut rx: mpsc::Receiver<Arc<Issued>>,
    errors: ErrorSink,
) -> Vec<Installed> {
    let mut installed = Vec::new();

    while let Some(issued) = rx.recv().await {
        let name = &issued.request.name;

        let device = match ctx.registry.primary_client(&target) {
            Ok(device) => device,
            Err(err) => {
                report(
                    &errors,
                    RequestFailure {
                        request: name.clone(),
                        stage: Stage::Installation,
                        target: Some(target.clone()),
                        error: err.into(),
                    },
                );
                continue;
            }
        };

        let installer = Installer::new(device, &ctx.timestamp);
        let mut complete = true;

        for installation in issued
            .request
            .installation
            .iter()
            .filter(|installation| installation.target == target)
        {
            if let Err(error) = installer.install(name, &issued.material, installation).await {
                complete = false;
                report(
                    &errors,
                    RequestFailure {
                        request: name.clone(),
                        stage: Stage::Installation,
                        target: Some(target.clone()),
                        error,
                    },
                );
            }
        }

        if complete {
            installed.push(Installed {
                request: name.clone(),
                target: target.clone(),
            });
        }
    }

    log::debug!("installation worker {target} done");

    installed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        acme::ChallengeSolver,
        config::{ProviderParameters, Variable},
        test::{FakeAuthority, FakeDevice, RecordingSolver},
    };

    const CONFIG: &str = r#"
organizations:
  - name: o
    environments:
      - name: e1
        management: { name: vpx-e1, address: 127.0.0.1 }
        credentials: { username: u, password: p }
      - name: e2
        management: { name: vpx-e2, address: 127.0.0.2 }
        credentials: { username: u, password: p }
users:
  - { name: default, email: admin@example.com }
parameters:
  - name: creds
    variables: [ { name: ADC_ACME_TEST_ORCHESTRATOR_TOKEN, value: t0k3n } ]
acme:
  dnsPropagationDelay: 0
  pollInterval: 0
"#;

    fn request(name: &str, provider: &str, challenge_type: &str) -> CertificateRequest {
        serde_yaml::from_str(&format!(
            r#"
name: {name}
request:
  target: {{ organization: o, environment: e1 }}
  user: default
  challenge: {{ service: "https://ca.test/directory", type: {challenge_type}, provider: {provider} }}
  content:
    commonName: {name}.example.com
installation:
  - target: {{ organization: o, environment: e1 }}
    sslVirtualServers: [ {{ name: vs-{name} }} ]
"#
        ))
        .unwrap()
    }

    struct Fixture {
        orchestrator: Orchestrator,
        e1: Arc<FakeDevice>,
        e2: Arc<FakeDevice>,
        authority: Arc<FakeAuthority>,
    }

    fn fixture(requests: Vec<CertificateRequest>, authority: FakeAuthority) -> Fixture {
        let e1 = Arc::new(FakeDevice::default());
        let e2 = Arc::new(FakeDevice::default());

        let mut registry = ConfiguredRegistry::new();
        registry.insert(Target::new("o", "e1"), e1.clone());
        registry.insert(Target::new("o", "e2"), e2.clone());

        let authority = Arc::new(authority);

        let orchestrator = Orchestrator::new(
            AppConfig::from_yaml(CONFIG).unwrap(),
            requests.into_iter().map(|r| (r.name.clone(), r)).collect(),
            Arc::new(registry),
            authority.clone(),
        )
        .unwrap();

        Fixture {
            orchestrator,
            e1,
            e2,
            authority,
        }
    }

    #[tokio::test]
    async fn two_providers_install_to_one_target() {
        let fx = fixture(
            vec![
                request("cert-a", "netscaler-http-global", "http-01"),
                request("cert-b", "netscaler-adns", "dns-01"),
            ],
            FakeAuthority::default(),
        );

        let plan = fx.orchestrator.plan();
        assert_eq!(
            plan.provider_queues,
            BTreeMap::from([
                ("netscaler-adns".to_owned(), 1),
                ("netscaler-http-global".to_owned(), 1)
            ])
        );
        assert_eq!(
            plan.target_queues,
            BTreeMap::from([(Target::new("o", "e1"), 2)])
        );

        let report = fx.orchestrator.request_all().await.unwrap();

        assert!(report.is_success(), "{:?}", report.failures);
        assert_eq!(report.issued, ["cert-a", "cert-b"]);
        assert_eq!(
            report.installed,
            [
                Installed {
                    request: "cert-a".to_owned(),
                    target: Target::new("o", "e1")
                },
                Installed {
                    request: "cert-b".to_owned(),
                    target: Target::new("o", "e1")
                },
            ]
        );

        assert!(fx.e1.certkey("ACME_cert-a").is_some());
        assert!(fx.e1.certkey("ACME_cert-b").is_some());
        assert_eq!(fx.e1.vserver_bindings("ACME_cert-a"), ["vs-cert-a"]);

        // challenges were cleaned up on the device
        assert!(fx.e1.responder_objects().is_empty());
        assert_eq!(fx.e1.txt_record_count(), 0);
        assert!(fx.e2.certkey("ACME_cert-a").is_none());
    }

    #[tokio::test]
    async fn failed_exchange_does_not_stop_the_batch() {
        let fx = fixture(
            vec![
                request("a", "netscaler-adns", "dns-01"),
                request("b", "netscaler-adns", "dns-01"),
                request("c", "netscaler-adns", "dns-01"),
            ],
            FakeAuthority::failing(&["b.example.com"]),
        );

        let report = fx.orchestrator.request_all().await.unwrap();

        assert!(!report.is_success());
        assert_eq!(report.issued, ["a", "c"]);
        assert_eq!(
            report.installed.iter().map(|i| i.request.as_str()).collect::<Vec<_>>(),
            ["a", "c"]
        );

        let failures = report.failures_of("b").collect::<Vec<_>>();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].stage, Stage::Issuance);

        assert!(fx.e1.certkey("ACME_a").is_some());
        assert!(fx.e1.certkey("ACME_b").is_none());
        assert!(fx.e1.certkey("ACME_c").is_some());
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected_before_work_starts() {
        let mut unknown_user = request("user", "netscaler-adns", "dns-01");
        unknown_user.request.user = "nobody".to_owned();

        let fx = fixture(
            vec![
                unknown_user,
                request("provider", "route53", "dns-01"),
                request("mismatch", "netscaler-adns", "http-01"),
                request("ok", "netscaler-adns", "dns-01"),
            ],
            FakeAuthority::default(),
        );

        assert_eq!(
            fx.orchestrator.plan().provider_queues,
            BTreeMap::from([("netscaler-adns".to_owned(), 1)])
        );

        let report = fx.orchestrator.request_all().await.unwrap();

        assert_eq!(report.issued, ["ok"]);
        assert_eq!(report.failures.len(), 3);
        assert!(report
            .failures
            .iter()
            .all(|f| f.stage == Stage::Configuration));
        assert_eq!(fx.authority.obtained(), ["ok.example.com"]);
    }

    #[tokio::test]
    async fn installation_failure_is_reported_per_target() {
        let mut req = request("multi", "netscaler-adns", "dns-01");
        let mut second = req.installation[0].clone();
        second.target = Target::new("o", "e2");
        req.installation.push(second);

        let fx = fixture(vec![req], FakeAuthority::default());
        fx.e2.fail_uploads();

        let report = fx.orchestrator.request_one("multi").await.unwrap();

        assert_eq!(report.issued, ["multi"]);
        assert_eq!(
            report.installed,
            [Installed {
                request: "multi".to_owned(),
                target: Target::new("o", "e1")
            }]
        );
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stage, Stage::Installation);
        assert_eq!(report.failures[0].target, Some(Target::new("o", "e2")));
    }

    #[tokio::test]
    async fn provider_parameters_are_scoped_to_the_exchange() {
        std::env::remove_var("ADC_ACME_TEST_ORCHESTRATOR_TOKEN");

        let mut scoped = request("scoped", "netscaler-adns", "dns-01");
        scoped.request.challenge.provider_parameters = Some("creds".to_owned());

        let fx = fixture(
            vec![scoped],
            FakeAuthority::observing("ADC_ACME_TEST_ORCHESTRATOR_TOKEN"),
        );

        let report = fx.orchestrator.request_one("scoped").await.unwrap();
        assert!(report.is_success(), "{:?}", report.failures);

        assert_eq!(fx.authority.observed(), [Some("t0k3n".to_owned())]);
        assert!(std::env::var_os("ADC_ACME_TEST_ORCHESTRATOR_TOKEN").is_none());
    }

    #[tokio::test]
    async fn unknown_parameter_set_is_a_configuration_failure() {
        let mut req = request("params", "netscaler-adns", "dns-01");
        req.request.challenge.provider_parameters = Some("missing".to_owned());

        let fx = fixture(vec![req], FakeAuthority::default());
        let report = fx.orchestrator.request_all().await.unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stage, Stage::Configuration);
        assert!(fx.authority.obtained().is_empty());
    }

    #[tokio::test]
    async fn named_dns_solver_is_built_for_its_requests() {
        let solver = Arc::new(RecordingSolver {
            challenge_type: Some(ChallengeType::Dns01),
            ..Default::default()
        });

        let mut dns = DnsSolvers::default();
        dns.register("recording", {
            let solver = Arc::clone(&solver);
            move || Ok(Arc::clone(&solver) as Arc<dyn ChallengeSolver>)
        });

        let fx = fixture(
            vec![request("named", "recording", "dns-01")],
            FakeAuthority::default(),
        );
        let orchestrator = fx.orchestrator.with_dns_solvers(dns);

        let report = orchestrator.request_all().await.unwrap();
        assert!(report.is_success(), "{:?}", report.failures);

        assert_eq!(
            solver.calls(),
            ["present named.example.com", "clean_up named.example.com"]
        );
        assert!(fx.e1.certkey("ACME_named").is_some());
    }

    #[tokio::test]
    async fn named_dns_solver_is_not_built_while_another_set_is_applied() {
        const VAR: &str = "ADC_ACME_TEST_ORCHESTRATOR_DNS_ENDPOINT";

        let observed = Arc::new(parking_lot::Mutex::new(None));

        let mut dns = DnsSolvers::default();
        dns.register("env-reader", {
            let observed = Arc::clone(&observed);
            move || {
                *observed.lock() = Some(std::env::var_os(VAR));
                Ok(Arc::new(RecordingSolver {
                    challenge_type: Some(ChallengeType::Dns01),
                    ..Default::default()
                }) as Arc<dyn ChallengeSolver>)
            }
        });

        let fx = fixture(
            vec![request("env", "env-reader", "dns-01")],
            FakeAuthority::default(),
        );
        let orchestrator = fx.orchestrator.with_dns_solvers(dns);

        let other = ProviderParameters {
            name: "other".to_owned(),
            variables: vec![Variable {
                name: VAR.to_owned(),
                value: "https://other.example.com".to_owned(),
            }],
        };
        let applied = params::apply(&other).await;

        let release = {
            let observed = Arc::clone(&observed);
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                let built_while_applied = observed.lock().is_some();
                drop(applied);
                built_while_applied
            }
        };

        let (report, built_while_applied) = tokio::join!(orchestrator.request_all(), release);
        let report = report.unwrap();

        assert!(report.is_success(), "{:?}", report.failures);
        assert!(!built_while_applied);
        assert_eq!(*observed.lock(), Some(None));
    }

    #[tokio::test]
    async fn unknown_request_name_fails_the_call() {
        let fx = fixture(vec![], FakeAuthority::default());
        assert!(fx.orchestrator.request_one("missing").await.is_err());
    }

    #[test]
    fn timestamp_has_fourteen_digits() {
        let ts = run_timestamp().unwrap();
        assert_eq!(ts.len(), 14);
        assert!(ts.chars().all(|c| c.is_ascii_digit()));
    }
}
