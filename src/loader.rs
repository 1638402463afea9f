//! Discovery of certificate request files.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use eyre::{eyre, WrapErr as _};

use crate::request::CertificateRequest;

/// Loads every `.yaml`/`.yml` file directly under `dir`, keyed by request name.
///
/// Duplicate names are an error. Files listing extra names are read relative to the request file.
pub fn load_requests(dir: &Path) -> eyre::Result<BTreeMap<String, CertificateRequest>> {
    let mut files = fs::read_dir(dir)
        .wrap_err_with(|| format!("failed to read request directory {}", dir.display()))?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<Result<Vec<PathBuf>, _>>()?;
    files.sort();

    let mut requests = BTreeMap::new();

    for path in files.into_iter().filter(|path| is_yaml(path)) {
        let request = load_request(&path)?;
        log::debug!("loaded request={} from {}", request.name, path.display());

        if requests.contains_key(&request.name) {
            return Err(eyre!(
                "request {} is defined more than once (again in {})",
                request.name,
                path.display()
            ));
        }

        requests.insert(request.name.clone(), request);
    }

    Ok(requests)
}

/// Loads a single request file.
pub fn load_request(path: &Path) -> eyre::Result<CertificateRequest> {
    let text = fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read request {}", path.display()))?;

    let mut request = serde_yaml::from_str::<CertificateRequest>(&text)
        .wrap_err_with(|| format!("invalid request {}", path.display()))?;

    if let Some(file) = &request.request.content.subject_alternative_names_file {
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let san_path = base.join(file);

        let names = fs::read_to_string(&san_path).wrap_err_with(|| {
            format!(
                "failed to read subject alternative names of {} from {}",
                request.name,
                san_path.display()
            )
        })?;

        request.request.content.file_names = names
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ToOwned::to_owned)
            .collect();
    }

    Ok(request)
}

fn is_yaml(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_yaml(name: &str, extra: &str) -> String {
        format!(
            r#"
name: {name}
request:
  user: default
  challenge: {{ service: LE_STAGING, type: http-01, provider: webserver }}
  content:
    commonName: {name}.example.com
{extra}
"#
        )
    }

    #[test]
    fn loads_yaml_files_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.yaml"), request_yaml("a", "")).unwrap();
        fs::write(dir.path().join("b.yml"), request_yaml("b", "")).unwrap();
        fs::write(dir.path().join("notes.txt"), "not a request").unwrap();

        let requests = load_requests(dir.path()).unwrap();
        assert_eq!(requests.keys().collect::<Vec<_>>(), ["a", "b"]);
    }

    #[test]
    fn duplicate_names_fail() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.yaml"), request_yaml("same", "")).unwrap();
        fs::write(dir.path().join("b.yaml"), request_yaml("same", "")).unwrap();

        let err = load_requests(dir.path()).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn reads_san_file_relative_to_request() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("sans.txt"), "api.example.com\n\n  cdn.example.com  \n").unwrap();
        fs::write(
            dir.path().join("web.yaml"),
            request_yaml("web", "    subjectAlternativeNamesFile: sans.txt"),
        )
        .unwrap();

        let requests = load_requests(dir.path()).unwrap();
        assert_eq!(
            requests["web"].request.content.domains(),
            ["web.example.com", "api.example.com", "cdn.example.com"]
        );
    }

    #[test]
    fn missing_san_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("web.yaml"),
            request_yaml("web", "    subjectAlternativeNamesFile: missing.txt"),
        )
        .unwrap();

        assert!(load_requests(dir.path()).is_err());
    }
}
