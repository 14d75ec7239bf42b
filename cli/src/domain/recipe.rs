//! Host recipe: shell scripts and file contents run on a machine.
//!
//! Pure functions, no I/O, no async. Each function returns the text to send
//! over the remote shell; the caller decides how failures are treated.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or `std::net`.

#![allow(clippy::format_push_string)]

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use devmachine_common::AppRuntime;
use serde::Deserialize;

use crate::domain::config::BootstrapConfig;
use crate::domain::error::ProvisionError;

/// Graceful stop of every supervised process.
pub const SUPERVISOR_STOP: &str = "pm2 stop all";

/// Restart of every supervised process after a resume.
pub const SUPERVISOR_RESTART: &str = "pm2 restart all";

/// Reverse proxy reload after a resume.
pub const PROXY_RELOAD: &str = "sudo systemctl reload nginx";

/// pm2 process names.
pub const APP_PROCESS: &str = "app";
pub const BACKEND_PROCESS: &str = "backend";

/// Environment variable names published to the backend project.
pub const ENV_JWT_PRIVATE_KEY: &str = "JWT_PRIVATE_KEY";
pub const ENV_JWKS: &str = "JWKS";
pub const ENV_SITE_URL: &str = "SITE_URL";

const ECOSYSTEM_FILE: &str = "ecosystem.config.cjs";
const ENV_FILE: &str = ".env.local";

/// One system bootstrap command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupStep {
    pub name: &'static str,
    pub script: String,
    /// A failed required step aborts the phase; others are logged.
    pub required: bool,
}

/// Steps that take a bare image to a host able to run the application.
#[must_use]
pub fn system_setup_steps(cfg: &BootstrapConfig, user: &str) -> Vec<SetupStep> {
    let apt = "sudo DEBIAN_FRONTEND=noninteractive apt-get";
    vec![
        SetupStep {
            name: "apt-packages",
            script: format!(
                "{apt} update -y && {apt} install -y git curl ca-certificates nginx certbot python3-certbot-nginx"
            ),
            required: true,
        },
        SetupStep {
            name: "node-runtime",
            script: format!(
                "command -v node >/dev/null 2>&1 && node --version | grep -q '^v{v}\\.' || \
                 (curl -fsSL https://deb.nodesource.com/setup_{v}.x | sudo -E bash - && {apt} install -y nodejs)",
                v = cfg.node_version
            ),
            required: true,
        },
        SetupStep {
            name: "process-supervisor",
            script: format!(
                "sudo npm install -g pm2 && sudo env PATH=\"$PATH\" pm2 startup systemd -u {u} --hp /home/{u}",
                u = shell_quote(user)
            ),
            required: true,
        },
        SetupStep {
            name: "reverse-proxy",
            script: "sudo rm -f /etc/nginx/sites-enabled/default && sudo systemctl enable --now nginx"
                .to_string(),
            required: true,
        },
        SetupStep {
            name: "coding-agent",
            script: format!(
                "sudo npm install -g {} && mkdir -p \"$HOME/workspace\"",
                shell_quote(&cfg.agent_package)
            ),
            required: false,
        },
    ]
}

// ── Repository ───────────────────────────────────────────────────────────────

/// Embed the access token into an https clone URL.
///
/// # Errors
///
/// Returns `ProvisionError::UnsupportedRepoUrl` for anything but `https://`.
pub fn authenticated_clone_url(clone_url: &str, token: &str) -> Result<String, ProvisionError> {
    let rest = clone_url
        .strip_prefix("https://")
        .filter(|r| !r.is_empty() && !r.contains('@'))
        .ok_or_else(|| ProvisionError::UnsupportedRepoUrl(clone_url.to_string()))?;
    Ok(format!("https://x-access-token:{token}@{rest}"))
}

/// Clone (or fast-forward) the repository, then drop the token from the remote.
#[must_use]
pub fn clone_script(authenticated_url: &str, clone_url: &str, app_dir: &str) -> String {
    let dir = shell_quote(app_dir);
    let auth = shell_quote(authenticated_url);
    format!(
        "if [ -d {dir}/.git ]; then git -C {dir} remote set-url origin {auth} && git -C {dir} pull --ff-only; \
         else rm -rf {dir} && git clone --depth 1 {auth} {dir}; fi && \
         git -C {dir} remote set-url origin {plain}",
        plain = shell_quote(clone_url)
    )
}

// ── Runtime configuration ────────────────────────────────────────────────────

/// Contents of `.env.local` for the application process.
#[must_use]
pub fn env_file(runtime: &AppRuntime, site_url: &str) -> String {
    format!(
        "NEXT_PUBLIC_CONVEX_URL={}\nCONVEX_DEPLOY_KEY={}\n{ENV_SITE_URL}={site_url}\n",
        runtime.backend_project_url, runtime.backend_deploy_credential
    )
}

/// pm2 ecosystem file running the dev server and the backend dev process.
#[must_use]
pub fn ecosystem_file(app_dir: &str, app_port: u16) -> String {
    format!(
        r#"module.exports = {{
  apps: [
    {{
      name: "{APP_PROCESS}",
      cwd: "{app_dir}",
      script: "npm",
      args: "run dev -- --port {app_port}",
      env: {{ PORT: "{app_port}" }},
    }},
    {{
      name: "{BACKEND_PROCESS}",
      cwd: "{app_dir}",
      script: "npx",
      args: "convex dev",
    }},
  ],
}};
"#
    )
}

/// Write `.env.local` and the ecosystem file into the app directory.
#[must_use]
pub fn write_runtime_config_script(app_dir: &str, env: &str, ecosystem: &str) -> String {
    format!(
        "{} && {}",
        write_file_script(&format!("{app_dir}/{ENV_FILE}"), env, false),
        write_file_script(&format!("{app_dir}/{ECOSYSTEM_FILE}"), ecosystem, false)
    )
}

/// Install dependencies and start both supervised processes.
#[must_use]
pub fn start_processes_script(app_dir: &str) -> String {
    format!(
        "cd {} && npm install && pm2 startOrReload {ECOSYSTEM_FILE} && pm2 save",
        shell_quote(app_dir)
    )
}

// ── Backend authentication ───────────────────────────────────────────────────

/// Signing key pair emitted by [`KEYGEN_SCRIPT`].
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthKeys {
    /// PKCS#8 PEM with newlines folded into spaces.
    pub private_key: String,
    /// JSON Web Key Set holding the public half.
    pub jwks: String,
}

/// Generates an RS256 key pair on the host and prints it as JSON.
pub const KEYGEN_SCRIPT: &str = r#"node -e '
const { generateKeyPairSync } = require("crypto");
const { privateKey, publicKey } = generateKeyPairSync("rsa", { modulusLength: 2048 });
const pem = privateKey.export({ type: "pkcs8", format: "pem" });
const jwk = publicKey.export({ format: "jwk" });
process.stdout.write(JSON.stringify({
  privateKey: pem.trimEnd().replace(/\n/g, " "),
  jwks: JSON.stringify({ keys: [{ use: "sig", ...jwk }] }),
}));
'"#;

/// Parse the output of [`KEYGEN_SCRIPT`].
///
/// # Errors
///
/// Returns `ProvisionError::UnexpectedOutput` if stdout is not the expected JSON.
pub fn parse_auth_keys(stdout: &str) -> Result<AuthKeys, ProvisionError> {
    serde_json::from_str(stdout.trim()).map_err(|e| ProvisionError::UnexpectedOutput {
        step: "auth-keygen".to_string(),
        detail: e.to_string(),
    })
}

// ── Reverse proxy & certificate ──────────────────────────────────────────────

/// Certificate and key file locations for a TLS site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub certificate: String,
    pub key: String,
}

impl TlsPaths {
    /// Derive the key path from a `fullchain.pem` path in the same directory.
    #[must_use]
    pub fn from_certificate(certificate: &str) -> Self {
        let dir = certificate.rsplit_once('/').map_or(".", |(d, _)| d);
        Self {
            certificate: certificate.to_string(),
            key: format!("{dir}/privkey.pem"),
        }
    }
}

/// Path certbot writes the certificate chain for `domain` to.
#[must_use]
pub fn letsencrypt_certificate_path(domain: &str) -> String {
    format!("/etc/letsencrypt/live/{domain}/fullchain.pem")
}

/// Non-interactive certificate issuance for `domain`.
#[must_use]
pub fn certbot_script(domain: &str, email: &str) -> String {
    let contact = if email.is_empty() {
        "--register-unsafely-without-email".to_string()
    } else {
        format!("-m {}", shell_quote(email))
    };
    format!(
        "sudo certbot certonly --nginx --non-interactive --agree-tos --keep-until-expiring {contact} -d {}",
        shell_quote(domain)
    )
}

/// nginx site proxying `domain` to the dev server. Plain HTTP without TLS paths.
#[must_use]
pub fn nginx_site(domain: &str, app_port: u16, tls: Option<&TlsPaths>) -> String {
    let proxy = format!(
        "    location / {{
        proxy_pass http://127.0.0.1:{app_port};
        proxy_http_version 1.1;
        proxy_set_header Upgrade $http_upgrade;
        proxy_set_header Connection \"upgrade\";
        proxy_set_header Host $host;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
    }}
"
    );

    let mut out = String::new();
    match tls {
        Some(paths) => {
            out.push_str(&format!(
                "server {{\n    listen 80;\n    server_name {domain};\n    return 301 https://$host$request_uri;\n}}\n\n"
            ));
            out.push_str("server {\n    listen 443 ssl;\n");
            out.push_str(&format!("    server_name {domain};\n"));
            out.push_str(&format!("    ssl_certificate {};\n", paths.certificate));
            out.push_str(&format!("    ssl_certificate_key {};\n", paths.key));
            out.push_str(&proxy);
            out.push_str("}\n");
        }
        None => {
            out.push_str("server {\n    listen 80;\n");
            out.push_str(&format!("    server_name {domain};\n"));
            out.push_str(&proxy);
            out.push_str("}\n");
        }
    }
    out
}

/// Install the site, validate the config, and reload nginx.
#[must_use]
pub fn install_site_script(domain: &str, site: &str) -> String {
    let available = format!("/etc/nginx/sites-available/{domain}");
    let enabled = format!("/etc/nginx/sites-enabled/{domain}");
    format!(
        "{} && sudo ln -sf {} {} && sudo nginx -t && {PROXY_RELOAD}",
        write_file_script(&available, site, true),
        shell_quote(&available),
        shell_quote(&enabled)
    )
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Write `content` to `path` without interpolating it into the shell.
#[must_use]
pub fn write_file_script(path: &str, content: &str, sudo: bool) -> String {
    let encoded = STANDARD.encode(content);
    let tee = if sudo { "sudo tee" } else { "tee" };
    format!(
        "echo {encoded} | base64 -d | {tee} {} > /dev/null",
        shell_quote(path)
    )
}

/// Single-quote `s` for POSIX shells.
#[must_use]
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
