//! macOS keychain certificates, managed through the `security` tool.
//!
//! Every function shells out (to `security`, or `openssl` for PKCS#12
//! files) and parses the text that comes back. Nothing here understands
//! certificates; aliases, friendly names and PEM bodies are pulled out of
//! tool output.
//!
//! | function | returns |
//! |---|---|
//! | `install(cert, password, keychain, allow_any, keychain_password)` | `true` |
//! | `uninstall(cert_name, keychain, keychain_password)` | `true` |
//! | `list_certs(keychain)` | list of aliases |
//! | `get_friendly_name(cert, password)` | alias stored in the PKCS#12 file |
//! | `get_default_keychain(user, domain)` | `security default-keychain` output |
//! | `set_default_keychain(keychain, domain, user)` | `true` |
//! | `unlock_keychain(keychain, password)` | `true` |
//! | `get_hash(name, password)` | PEM body, or `false` |

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

use super::runner::{CommandLine, CommandRunner};
use crate::capabilities::{
    BoundArgs, FunctionRegistry, Handler, HandlerError, Param, RegistryError, Signature,
};

/// Keychain used when the caller names none.
pub const SYSTEM_KEYCHAIN: &str = "/Library/Keychains/System.keychain";

/// Preference domains accepted by `security default-keychain -d`.
pub const DOMAINS: &[&str] = &["user", "system", "common", "dynamic"];

static ALIAS_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""alis"<blob>=(?:0x[0-9A-Fa-f]+\s+)?"(.*)"\s*$"#).expect("alias pattern")
});
static PEM_BODY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)-----BEGIN CERTIFICATE-----(.*?)-----END CERTIFICATE-----")
        .expect("pem pattern")
});

/// Extract certificate aliases from `security find-certificate -a` output.
///
/// Aliases appear as `"alis"<blob>="Salt Test"`, or in hex form
/// `"alis"<blob>=0x53...  "Salt Test"` when the name has unusual bytes.
/// Entries with a `<NULL>` alias are skipped. Output order is kept.
pub fn parse_cert_aliases(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| ALIAS_LINE.captures(line.trim()))
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Extract the `friendlyName:` attribute from `openssl pkcs12 -info` output.
pub fn parse_friendly_name(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("friendlyName:"))
        .map(|name| name.trim().to_string())
}

/// The text between the first PEM certificate markers.
pub fn parse_pem_body(output: &str) -> Option<String> {
    PEM_BODY.captures(output).map(|caps| caps[1].to_string())
}

/// The keychain operations, over an injectable command runner.
pub struct Keychain {
    runner: Arc<dyn CommandRunner>,
}

impl Keychain {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Import a PKCS#12 certificate into `keychain`.
    pub fn install(
        &self,
        cert: &str,
        password: &str,
        keychain: &str,
        allow_any: bool,
        keychain_password: Option<&str>,
    ) -> Result<bool, HandlerError> {
        if let Some(kc_password) = keychain_password {
            self.unlock_keychain(keychain, kc_password)?;
        }

        let mut command = CommandLine::new("security")
            .arg("import")
            .arg(cert)
            .arg("-P")
            .secret_arg(password)
            .arg("-k")
            .arg(keychain);
        if allow_any {
            command = command.arg("-A");
        }

        self.runner.run(&command)?.checked(&command)?;
        log::info!("Installed certificate {} into {}", cert, keychain);
        Ok(true)
    }

    /// Delete the certificate whose alias is `cert_name`.
    ///
    /// Fails when no such certificate exists.
    pub fn uninstall(
        &self,
        cert_name: &str,
        keychain: &str,
        keychain_password: Option<&str>,
    ) -> Result<bool, HandlerError> {
        if let Some(kc_password) = keychain_password {
            self.unlock_keychain(keychain, kc_password)?;
        }

        let command = CommandLine::new("security")
            .arg("delete-certificate")
            .arg("-c")
            .arg(cert_name)
            .arg(keychain);
        self.runner.run(&command)?.checked(&command)?;
        log::info!("Removed certificate '{}' from {}", cert_name, keychain);
        Ok(true)
    }

    /// Aliases of every certificate in `keychain`.
    pub fn list_certs(&self, keychain: &str) -> Result<Vec<String>, HandlerError> {
        let command = CommandLine::new("security")
            .arg("find-certificate")
            .arg("-a")
            .arg(keychain);
        let output = self.runner.run(&command)?.checked(&command)?;
        Ok(parse_cert_aliases(&output.stdout))
    }

    /// The friendly name stored in a PKCS#12 file.
    pub fn get_friendly_name(&self, cert: &str, password: &str) -> Result<String, HandlerError> {
        let command = CommandLine::new("openssl")
            .arg("pkcs12")
            .arg("-in")
            .arg(cert)
            .arg("-passin")
            .secret_arg(format!("pass:{}", password))
            .arg("-info")
            .arg("-nodes")
            .arg("-nokeys");
        let output = self.runner.run(&command)?.checked(&command)?;
        parse_friendly_name(&output.stdout)
            .ok_or_else(|| HandlerError::Failed(format!("No friendlyName found in {}", cert)))
    }

    /// The default keychain for a preference domain, as `security` prints it.
    pub fn get_default_keychain(
        &self,
        user: Option<&str>,
        domain: &str,
    ) -> Result<String, HandlerError> {
        check_domain(domain)?;
        let command = CommandLine::new("security")
            .arg("default-keychain")
            .arg("-d")
            .arg(domain)
            .runas(user.map(str::to_string));
        let output = self.runner.run(&command)?.checked(&command)?;
        Ok(output.stdout.trim().to_string())
    }

    pub fn set_default_keychain(
        &self,
        keychain: &str,
        domain: &str,
        user: Option<&str>,
    ) -> Result<bool, HandlerError> {
        check_domain(domain)?;
        let command = CommandLine::new("security")
            .arg("default-keychain")
            .arg("-d")
            .arg(domain)
            .arg("-s")
            .arg(keychain)
            .runas(user.map(str::to_string));
        self.runner.run(&command)?.checked(&command)?;
        Ok(true)
    }

    pub fn unlock_keychain(&self, keychain: &str, password: &str) -> Result<bool, HandlerError> {
        let command = CommandLine::new("security")
            .arg("unlock-keychain")
            .arg("-p")
            .secret_arg(password)
            .arg(keychain);
        self.runner.run(&command)?.checked(&command)?;
        Ok(true)
    }

    /// PEM body of a certificate, read from a `.p12` file or looked up in
    /// the keychain by name. `None` when the output holds no certificate,
    /// or when `security` cannot find the name (exit 44).
    pub fn get_hash(
        &self,
        name: &str,
        password: Option<&str>,
    ) -> Result<Option<String>, HandlerError> {
        if name.ends_with(".p12") {
            let password = password.unwrap_or_default();
            let command = CommandLine::new("openssl")
                .arg("pkcs12")
                .arg("-in")
                .arg(name)
                .arg("-passin")
                .secret_arg(format!("pass:{}", password))
                .arg("-passout")
                .secret_arg(format!("pass:{}", password));
            let output = self.runner.run(&command)?.checked(&command)?;
            return Ok(parse_pem_body(&output.stdout));
        }

        let command = CommandLine::new("security")
            .arg("find-certificate")
            .arg("-c")
            .arg(name)
            .arg("-m")
            .arg("-p");
        let output = self.runner.run(&command)?;
        if !output.success() {
            log::debug!(
                "no certificate named {:?} (exit {}): {}",
                name,
                output.retcode,
                output.stderr.trim()
            );
            return Ok(None);
        }
        Ok(parse_pem_body(&output.stdout))
    }
}

fn check_domain(domain: &str) -> Result<(), HandlerError> {
    if DOMAINS.contains(&domain) {
        Ok(())
    } else {
        Err(HandlerError::InvalidArgument {
            name: "domain".to_string(),
            reason: format!("'{}' is not one of {}", domain, DOMAINS.join(", ")),
        })
    }
}

fn bound<F>(keychain: &Arc<Keychain>, f: F) -> Arc<dyn Handler>
where
    F: Fn(&Keychain, &BoundArgs) -> Result<Value, HandlerError> + Send + Sync + 'static,
{
    let keychain = Arc::clone(keychain);
    Arc::new(move |args: &BoundArgs| f(keychain.as_ref(), args))
}

/// Register `keychain.*` with `default_keychain` as the default target keychain.
pub fn register(
    registry: &mut FunctionRegistry,
    runner: Arc<dyn CommandRunner>,
    default_keychain: &str,
) -> Result<(), RegistryError> {
    let kc = Arc::new(Keychain::new(runner));

    registry.register_with(
        "keychain.install",
        Signature::new(vec![
            Param::required("cert"),
            Param::required("password"),
            Param::optional("keychain", default_keychain),
            Param::optional("allow_any", false),
            Param::optional("keychain_password", Value::Null),
        ]),
        "Install a PKCS#12 certificate into a keychain; returns true.",
        bound(&kc, |kc, args| {
            let keychain_password = args.opt_string("keychain_password")?;
            kc.install(
                &args.string("cert")?,
                &args.string("password")?,
                &args.string("keychain")?,
                args.bool("allow_any")?,
                keychain_password.as_deref(),
            )
            .map(Value::Bool)
        }),
    )?;

    registry.register_with(
        "keychain.uninstall",
        Signature::new(vec![
            Param::required("cert_name"),
            Param::optional("keychain", default_keychain),
            Param::optional("keychain_password", Value::Null),
        ]),
        "Remove the certificate with the given alias; returns true.",
        bound(&kc, |kc, args| {
            let keychain_password = args.opt_string("keychain_password")?;
            kc.uninstall(
                &args.string("cert_name")?,
                &args.string("keychain")?,
                keychain_password.as_deref(),
            )
            .map(Value::Bool)
        }),
    )?;

    registry.register_with(
        "keychain.list_certs",
        Signature::new(vec![Param::optional("keychain", default_keychain)]),
        "List the aliases of all certificates in a keychain.",
        bound(&kc, |kc, args| {
            kc.list_certs(&args.string("keychain")?).map(|certs| json!(certs))
        }),
    )?;

    registry.register_with(
        "keychain.get_friendly_name",
        Signature::new(vec![Param::required("cert"), Param::required("password")]),
        "Return the friendly name (alias) stored in a PKCS#12 file.",
        bound(&kc, |kc, args| {
            kc.get_friendly_name(&args.string("cert")?, &args.string("password")?)
                .map(Value::String)
        }),
    )?;

    registry.register_with(
        "keychain.get_default_keychain",
        Signature::new(vec![
            Param::optional("user", Value::Null),
            Param::optional("domain", "user"),
        ]),
        "Return the default keychain for a preference domain.",
        bound(&kc, |kc, args| {
            let user = args.opt_string("user")?;
            kc.get_default_keychain(user.as_deref(), &args.string("domain")?)
                .map(Value::String)
        }),
    )?;

    registry.register_with(
        "keychain.set_default_keychain",
        Signature::new(vec![
            Param::required("keychain"),
            Param::optional("domain", "user"),
            Param::optional("user", Value::Null),
        ]),
        "Set the default keychain for a preference domain; returns true.",
        bound(&kc, |kc, args| {
            let user = args.opt_string("user")?;
            let keychain = args.string("keychain")?;
            kc.set_default_keychain(&keychain, &args.string("domain")?, user.as_deref())
                .map(Value::Bool)
        }),
    )?;

    registry.register_with(
        "keychain.unlock_keychain",
        Signature::new(vec![Param::required("keychain"), Param::required("password")]),
        "Unlock a keychain; returns true.",
        bound(&kc, |kc, args| {
            kc.unlock_keychain(&args.string("keychain")?, &args.string("password")?)
                .map(Value::Bool)
        }),
    )?;

    registry.register_with(
        "keychain.get_hash",
        Signature::new(vec![
            Param::required("name"),
            Param::optional("password", Value::Null),
        ]),
        "Return the PEM body of a certificate file or keychain entry, or false.",
        bound(&kc, |kc, args| {
            let password = args.opt_string("password")?;
            kc.get_hash(&args.string("name")?, password.as_deref())
                .map(|hash| hash.map(Value::String).unwrap_or(Value::Bool(false)))
        }),
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::runner::testing::ScriptedRunner;
    use crate::modules::runner::CommandOutput;

    const FIND_CERTIFICATE: &str = r#"keychain: "/Library/Keychains/System.keychain"
version: 512
class: 0x80001000
attributes:
    "alis"<blob>="com.apple.systemdefault"
    "cenc"<uint32>=0x00000003
    "labl"<blob>="com.apple.systemdefault"
keychain: "/Library/Keychains/System.keychain"
version: 512
class: 0x80001000
attributes:
    "alis"<blob>="Salt Test"
    "labl"<blob>="Salt Test"
keychain: "/Library/Keychains/System.keychain"
attributes:
    "alis"<blob>=<NULL>
keychain: "/Library/Keychains/System.keychain"
attributes:
    "alis"<blob>=0x4D7920436572740A  "My Cert\012"
"#;

    const PKCS12_INFO: &str = "MAC: sha1, Iteration 2048
MAC length: 20, salt length: 8
PKCS7 Encrypted data: pbeWithSHA1And40BitRC2-CBC, Iteration 2048
Certificate bag
Bag Attributes
    localKeyID: 8E 2C 4F 3A
    friendlyName: Salt Test
subject=/CN=Salt Test
-----BEGIN CERTIFICATE-----
MIIC+TCCAeGgAwIBAgIJAK
-----END CERTIFICATE-----
";

    fn keychain(outputs: Vec<CommandOutput>) -> (Arc<ScriptedRunner>, Keychain) {
        let runner = Arc::new(ScriptedRunner::new(outputs));
        (runner.clone(), Keychain::new(runner))
    }

    #[test]
    fn test_parse_cert_aliases() {
        assert_eq!(
            parse_cert_aliases(FIND_CERTIFICATE),
            vec!["com.apple.systemdefault", "Salt Test", "My Cert\\012"]
        );
        assert!(parse_cert_aliases("").is_empty());
    }

    #[test]
    fn test_parse_friendly_name_and_pem() {
        assert_eq!(parse_friendly_name(PKCS12_INFO).as_deref(), Some("Salt Test"));
        assert_eq!(parse_friendly_name("MAC: sha1"), None);
        assert_eq!(
            parse_pem_body(PKCS12_INFO).as_deref(),
            Some("\nMIIC+TCCAeGgAwIBAgIJAK\n")
        );
        assert_eq!(parse_pem_body("no cert here"), None);
    }

    #[test]
    fn test_install_builds_import_command() {
        let (runner, kc) = keychain(vec![CommandOutput::ok("1 identity imported.\n")]);
        assert!(kc
            .install("/tmp/salttest.p12", "salttest", SYSTEM_KEYCHAIN, true, None)
            .unwrap());

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program(), "security");
        assert_eq!(
            calls[0].args(),
            &[
                "import",
                "/tmp/salttest.p12",
                "-P",
                "salttest",
                "-k",
                SYSTEM_KEYCHAIN,
                "-A"
            ]
        );
        assert!(!runner.rendered()[0].contains("salttest -k"));
    }

    #[test]
    fn test_install_unlocks_first_when_keychain_password_given() {
        let (runner, kc) = keychain(vec![CommandOutput::ok(""), CommandOutput::ok("")]);
        kc.install("/tmp/c.p12", "pw", "/tmp/test.keychain", false, Some("kcpw"))
            .unwrap();
        let calls = runner.calls();
        assert_eq!(calls[0].args()[0], "unlock-keychain");
        assert_eq!(calls[1].args()[0], "import");
    }

    #[test]
    fn test_uninstall_missing_alias_is_error() {
        let (_, kc) = keychain(vec![CommandOutput::failed(
            44,
            "SecKeychainSearchCopyNext: The specified item could not be found in the keychain.",
        )]);
        let err = kc.uninstall("Salt Test", SYSTEM_KEYCHAIN, None).unwrap_err();
        match err {
            HandlerError::Command { retcode, stderr, command } => {
                assert_eq!(retcode, 44);
                assert!(stderr.contains("could not be found"));
                assert!(command.contains("\"Salt Test\""));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_get_default_keychain_trims_and_validates_domain() {
        let (runner, kc) = keychain(vec![CommandOutput::ok(
            "    \"/Users/admin/Library/Keychains/login.keychain-db\"\n",
        )]);
        assert_eq!(
            kc.get_default_keychain(Some("admin"), "user").unwrap(),
            "\"/Users/admin/Library/Keychains/login.keychain-db\""
        );
        assert_eq!(runner.rendered()[0], "sudo -u admin security default-keychain -d user");

        assert!(matches!(
            kc.get_default_keychain(None, "galaxy"),
            Err(HandlerError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_get_hash_chooses_tool_by_extension() {
        let (runner, kc) = keychain(vec![
            CommandOutput::ok(PKCS12_INFO),
            CommandOutput::failed(
                44,
                "security: SecKeychainSearchCopyNext: \
                 The specified item could not be found in the keychain.",
            ),
        ]);
        assert!(kc.get_hash("/tmp/salttest.p12", Some("pw")).unwrap().is_some());
        assert_eq!(kc.get_hash("Salt Test", None).unwrap(), None);

        let calls = runner.calls();
        assert_eq!(calls[0].program(), "openssl");
        assert_eq!(calls[1].program(), "security");
        assert_eq!(calls[1].args(), &["find-certificate", "-c", "Salt Test", "-m", "-p"]);
    }

    #[test]
    fn test_get_hash_bad_p12_password_is_an_error() {
        let (_, kc) = keychain(vec![CommandOutput::failed(
            1,
            "Mac verify error: invalid password?",
        )]);
        assert!(matches!(
            kc.get_hash("/tmp/salttest.p12", Some("wrong")),
            Err(HandlerError::Command { retcode: 1, .. })
        ));
    }

    #[test]
    fn test_registered_handlers_use_default_keychain() {
        let runner = Arc::new(ScriptedRunner::new(vec![CommandOutput::ok(FIND_CERTIFICATE)]));
        let mut registry = FunctionRegistry::new();
        register(&mut registry, runner.clone(), "/tmp/custom.keychain").unwrap();
        assert_eq!(registry.list_module("keychain").len(), 8);

        let registration = registry.resolve("keychain.list_certs").unwrap();
        let args = registration
            .signature
            .bind(&[], &serde_json::Map::new())
            .unwrap();
        let value = registration.handler.handle(&args).unwrap();
        assert_eq!(value, json!(["com.apple.systemdefault", "Salt Test", "My Cert\\012"]));
        assert_eq!(
            runner.calls()[0].args(),
            &["find-certificate", "-a", "/tmp/custom.keychain"]
        );
    }
}
