// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2025 Waddle Social

//! Waddle Register - create an XMPP account in-band over BOSH.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{debug, info, warn};
use waddle_core::config::{self, Config};
use waddle_core::event::{BroadcastEventBus, EventBus};
use waddle_core::telemetry;
use waddle_register::{Registrar, RegistrationState, RegistrationStatus};
use waddle_xmpp::{BoshTransport, ConnectOptions, ConnectionConfig, Status, StatusCallback};

/// Register an account on an XMPP server that supports in-band registration
#[derive(Parser, Debug)]
#[command(name = "waddle-register")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server domain, overriding account.domain
    #[arg(short, long)]
    domain: Option<String>,

    /// Username to register
    #[arg(short, long)]
    username: Option<String>,

    /// Password for the new account
    #[arg(short, long)]
    password: Option<String>,

    /// Any other form field, as key=value (repeatable)
    #[arg(short, long = "field", value_parser = parse_field)]
    fields: Vec<(String, String)>,

    /// Log in with the new account once it exists
    #[arg(long)]
    login: bool,
}

fn parse_field(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got {raw:?}")),
    }
}

fn connection_settings(config: &Config, domain: &str) -> ConnectionConfig {
    let transport = &config.transport;
    let mut settings = ConnectionConfig::new(domain, transport.service.clone());
    settings.wait = transport.wait;
    settings.hold = transport.hold;
    settings.route = transport.route.clone();
    settings.max_retries = transport.max_retries;
    settings.timeout_seconds = transport.timeout_seconds;
    settings.headers = transport
        .headers
        .iter()
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    settings
}

fn print_status(status: Status, condition: Option<&str>) {
    let label = RegistrationStatus::from_status(status)
        .map(|registration| registration.name())
        .unwrap_or_else(|| status.name());
    match condition {
        Some(condition) => println!("[{label}] {condition}"),
        None => println!("[{label}]"),
    }
}

async fn drive_while<F>(registrar: &mut Registrar<BoshTransport>, busy: F) -> Result<()>
where
    F: Fn(&RegistrationState) -> bool,
{
    while busy(&registrar.state()) && registrar.connection().is_connected() {
        registrar
            .process_next()
            .await
            .context("connection failed while registering")?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => config::load_config_from(path.clone()),
        None => config::load_config(),
    }
    .with_context(|| {
        let path = cli.config.clone().unwrap_or_else(config::config_path);
        format!("failed to load configuration from {}", path.display())
    })?;

    telemetry::init(&config.logging)?;

    let domain = cli
        .domain
        .clone()
        .unwrap_or_else(|| config.account.domain.clone());
    let username = cli.username.clone().or_else(|| config.account.username.clone());
    let password = cli.password.clone().or_else(|| config.account.password.clone());

    let bus = Arc::new(BroadcastEventBus::new(config.event_bus.channel_capacity));
    let mut wire = bus
        .subscribe("xmpp.debug.stanza.*")
        .context("failed to subscribe to stanza events")?;
    tokio::spawn(async move {
        while let Ok(event) = wire.recv().await {
            debug!(channel = %event.channel, payload = ?event.payload, "wire");
        }
    });

    let event_bus: Arc<dyn EventBus> = bus;
    let mut registrar = Registrar::<BoshTransport>::with_event_bus(
        connection_settings(&config, &domain),
        event_bus,
        Duration::from_secs(config.registration.submit_timeout_seconds),
    );

    let callback: StatusCallback = Box::new(print_status);
    info!(%domain, service = %config.transport.service, "starting registration");
    registrar
        .connect(&domain, callback, ConnectOptions::default())
        .await
        .with_context(|| format!("failed to connect to {domain}"))?;

    drive_while(&mut registrar, |state| {
        matches!(
            state,
            RegistrationState::Connecting | RegistrationState::AwaitingForm
        )
    })
    .await?;

    if registrar.state() != RegistrationState::FormReady {
        bail!("server did not provide a registration form ({:?})", registrar.state());
    }

    if let Some(session) = registrar.session() {
        if !session.title.is_empty() {
            println!("{}", session.title);
        }
        if !session.instructions.is_empty() {
            println!("{}", session.instructions);
        }
        let fields: Vec<&str> = session.fields.keys().collect();
        println!("fields: {}", fields.join(", "));
    }

    if let Some(username) = &username {
        registrar.set_field("username", username.as_str());
    }
    if let Some(password) = &password {
        registrar.set_field("password", password.as_str());
    }
    for (key, value) in &cli.fields {
        registrar.set_field(key, value.as_str());
    }
    if let Some(session) = registrar.session() {
        for (key, value) in session.fields.iter() {
            if value.is_empty() {
                warn!(field = key, "field left empty");
            }
        }
    }

    registrar.submit().await.context("failed to send registration")?;
    drive_while(&mut registrar, |state| {
        *state == RegistrationState::AwaitingResult
    })
    .await?;

    match registrar.state() {
        RegistrationState::Registered => {
            println!(
                "registered {}@{domain}",
                username.as_deref().unwrap_or_default()
            );
        }
        RegistrationState::TimedOut => bail!("registration timed out"),
        RegistrationState::Failed { status, condition } => {
            bail!(
                "registration failed: {} {}",
                status.name(),
                condition.unwrap_or_default()
            );
        }
        other => bail!("registration ended in unexpected state {other:?}"),
    }

    if cli.login {
        registrar
            .authenticate()
            .await
            .context("failed to log in with the new account")?;
        match registrar.connection().bound_jid() {
            Some(jid) => println!("logged in as {jid}"),
            None => warn!("login did not complete"),
        }
    }

    registrar
        .disconnect(Some("registration finished"))
        .await
        .context("failed to close the session")?;
    Ok(())
}
