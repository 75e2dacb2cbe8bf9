//! Post-build result: image, hostname and user-facing warnings.

use std::collections::BTreeMap;

use crate::descriptor::{DEFAULT_SERVICE, SslPolicy};
use crate::operation::BuildOperation;

/// Longest DNS label a certificate wildcard can cover.
pub const MAX_DNS_LABEL_LENGTH: usize = 63;

/// Separator used instead of `.` when the hostname must stay one label.
const ALT_SEPARATOR: &str = "-dot-";

/// Domain serving applications when no hostname is configured.
pub const DEFAULT_DOMAIN: &str = "appspot.com";

/// Hostname and the warnings produced while computing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hostname {
    pub url: String,
    pub warnings: Vec<String>,
}

/// Compute the URL a service version is reachable at.
///
/// `app_hostname` is the application's default hostname (`{app}.appspot.com`).
/// The `default` service is omitted from the hostname. `deploy` is false when
/// the hostname is only being displayed.
pub fn app_hostname(
    app_hostname: &str,
    service: Option<&str>,
    version: Option<&str>,
    ssl: SslPolicy,
    deploy: bool,
) -> Hostname {
    let (app_id, domain) = app_hostname
        .split_once('.')
        .unwrap_or((app_hostname, DEFAULT_DOMAIN));
    let service_name = service.filter(|s| *s != DEFAULT_SERVICE);

    let parts: Vec<&str> = [version, service_name, Some(app_id)]
        .into_iter()
        .flatten()
        .filter(|p| !p.is_empty())
        .collect();

    let mut warnings = Vec::new();
    let (scheme, subdomain) = match ssl {
        SslPolicy::Http => ("http", parts.join(".")),
        SslPolicy::HttpOrHttps | SslPolicy::Https => {
            let single_label = parts.join(ALT_SEPARATOR);
            if single_label.len() <= MAX_DNS_LABEL_LENGTH {
                ("https", single_label)
            } else {
                let shown = service.unwrap_or(DEFAULT_SERVICE);
                if deploy {
                    let template = [
                        (version, "$VERSION_ID"),
                        (service_name, "$SERVICE_ID"),
                        (Some(app_id), "$APP_ID"),
                    ]
                    .into_iter()
                    .filter(|(part, _)| part.is_some_and(|p| !p.is_empty()))
                    .map(|(_, name)| name)
                    .collect::<Vec<_>>()
                    .join(ALT_SEPARATOR);
                    warnings.push(format!(
                        "This deployment will result in an invalid SSL certificate for service \
                         [{shown}]. The total length of your subdomain in the format {template} \
                         should not exceed {MAX_DNS_LABEL_LENGTH} characters. Please verify that \
                         the certificate corresponds to the parent domain of your application \
                         when you connect."
                    ));
                }
                let scheme = match ssl {
                    SslPolicy::Https => {
                        if !deploy {
                            warnings.push(format!(
                                "Most browsers will reject the SSL certificate for service [{shown}]."
                            ));
                        }
                        "https"
                    }
                    _ => "http",
                };
                (scheme, parts.join("."))
            }
        }
    };

    Hostname {
        url: format!("{scheme}://{subdomain}.{domain}"),
        warnings,
    }
}

/// Result of one deploy invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployOutcome {
    /// Image the service runs, built or pre-built.
    pub image: Option<String>,
    pub hostname: Option<String>,
    /// User-facing warnings in the order they were raised.
    pub warnings: Vec<String>,
    /// Generated files added to the uploaded source.
    pub uploaded_generated_files: BTreeMap<String, Vec<u8>>,
    /// Build handle; present unless nothing was submitted.
    pub operation: Option<BuildOperation>,
}

impl DeployOutcome {
    pub fn with_image(image: Option<String>) -> Self {
        Self {
            image,
            ..Self::default()
        }
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Record the hostname, appending its warnings after existing ones.
    pub fn set_hostname(&mut self, hostname: Hostname) {
        self.hostname = Some(hostname.url);
        self.warnings.extend(hostname.warnings);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn plain_http_hostname() {
        let h = app_hostname("app.appspot.com", Some("svc"), Some("v1"), SslPolicy::Http, true);
        assert_eq!(h.url, "http://v1.svc.app.appspot.com");
        assert!(h.warnings.is_empty());
    }

    #[test]
    fn default_service_is_omitted() {
        let h = app_hostname("app.appspot.com", Some("default"), Some("v1"), SslPolicy::Http, true);
        assert_eq!(h.url, "http://v1.app.appspot.com");
        let h = app_hostname("app.appspot.com", None, None, SslPolicy::Http, true);
        assert_eq!(h.url, "http://app.appspot.com");
    }

    #[test]
    fn short_https_uses_single_label() {
        let h = app_hostname("app.appspot.com", Some("svc"), Some("v1"), SslPolicy::Https, true);
        assert_eq!(h.url, "https://v1-dot-svc-dot-app.appspot.com");
        assert!(h.warnings.is_empty());
    }

    #[test]
    fn custom_domain_base() {
        let h = app_hostname("appid.a.b.c.com", Some("svc"), None, SslPolicy::Http, true);
        assert_eq!(h.url, "http://svc.appid.a.b.c.com");
    }

    #[test]
    fn long_https_warns_on_deploy() {
        let (a, s, v) = ("a".repeat(29), "b".repeat(33), "c".repeat(33));
        let h = app_hostname(
            &format!("{a}.appspot.com"),
            Some(&s),
            Some(&v),
            SslPolicy::Https,
            true,
        );
        assert_eq!(h.url, format!("https://{v}.{s}.{a}.appspot.com"));
        assert_eq!(h.warnings.len(), 1);
        assert!(h.warnings[0].contains("$VERSION_ID-dot-$SERVICE_ID-dot-$APP_ID"));
        assert!(h.warnings[0].contains("63"));
        assert!(!h.warnings[0].contains("Most browsers"));
    }

    #[test]
    fn long_https_without_deploy_warns_browser_only() {
        let (a, s, v) = ("a".repeat(29), "b".repeat(33), "c".repeat(33));
        let h = app_hostname(
            &format!("{a}.appspot.com"),
            Some(&s),
            Some(&v),
            SslPolicy::Https,
            false,
        );
        assert_eq!(
            h.warnings,
            vec![format!("Most browsers will reject the SSL certificate for service [{s}].")]
        );
    }

    #[test]
    fn long_optional_https_falls_back_to_http() {
        let (a, v) = ("a".repeat(40), "c".repeat(30));
        let h = app_hostname(
            &format!("{a}.appspot.com"),
            Some("default"),
            Some(&v),
            SslPolicy::HttpOrHttps,
            true,
        );
        assert_eq!(h.url, format!("http://{v}.{a}.appspot.com"));
        assert_eq!(h.warnings.len(), 1);
        assert!(h.warnings[0].contains("in the format $VERSION_ID-dot-$APP_ID "));
        assert!(h.warnings[0].contains("service [default]"));
    }

    #[test]
    fn hostname_warnings_follow_existing_ones() {
        let mut outcome = DeployOutcome::with_image(None);
        outcome.warn("first");
        outcome.set_hostname(Hostname {
            url: "http://x".to_owned(),
            warnings: vec!["second".to_owned()],
        });
        assert_eq!(outcome.warnings, vec!["first", "second"]);
    }

    proptest! {
        #[test]
        fn http_never_warns(v in "[a-z]{1,40}", s in "[a-z]{1,40}", a in "[a-z]{1,40}") {
            let h = app_hostname(&format!("{a}.appspot.com"), Some(&s), Some(&v), SslPolicy::Http, true);
            prop_assert!(h.warnings.is_empty());
        }

        #[test]
        fn https_warns_iff_label_too_long(v in "[a-z]{1,40}", s in "[a-z]{1,40}", a in "[a-z]{1,40}") {
            prop_assume!(s != "default");
            let h = app_hostname(&format!("{a}.appspot.com"), Some(&s), Some(&v), SslPolicy::Https, true);
            let label_len = v.len() + s.len() + a.len() + 2 * ALT_SEPARATOR.len();
            prop_assert_eq!(h.warnings.is_empty(), label_len <= MAX_DNS_LABEL_LENGTH);
        }
    }
}
