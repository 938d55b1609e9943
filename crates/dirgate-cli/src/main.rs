//! Dirgate - directory authentication from the command line
//!
//! Authenticates users, searches and changes passwords against an LDAP
//! directory using the same engine a host application embeds.

mod config;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use config::Config;
use dirgate_core::types::LdapEntry;
use dirgate_ldap::{
    create_ldap_authentication_handler, execute_password_modify_operation, execute_search_operation,
    new_connection_factory, HandlerCollaborators, Ldap3Connector, SearchFilter, UsernamePasswordCredential,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "dirgate")]
#[command(author = "Dirgate Team")]
#[command(version = dirgate_core::VERSION)]
#[command(about = "LDAP authentication engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, env = "DIRGATE_CONFIG")]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs and results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate a user and print the resulting principal
    Authenticate {
        username: String,

        #[arg(long, env = "DIRGATE_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Open one connection and report the outcome
    TestConnection,

    /// Search the directory
    Search {
        /// LDAP filter, e.g. "(uid=jdoe)"
        filter: String,

        /// Search base; defaults to the first configured base DN
        #[arg(long)]
        base_dn: Option<String>,

        /// Attributes to return
        #[arg(short, long, value_delimiter = ',')]
        attributes: Vec<String>,

        /// Page size; 0 disables paging
        #[arg(long, default_value_t = 0)]
        page_size: i32,
    },

    /// Change the password of an entry
    Passwd {
        dn: String,

        #[arg(long, env = "DIRGATE_OLD_PASSWORD", hide_env_values = true, default_value = "")]
        old_password: String,

        #[arg(long, env = "DIRGATE_NEW_PASSWORD", hide_env_values = true)]
        new_password: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    // Initialize logging
    let level = cli
        .log_level
        .clone()
        .or_else(|| config.log_level.clone())
        .unwrap_or_else(|| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(true).with_writer(std::io::stderr)).init();
    }

    if let Commands::Version = cli.command {
        println!("dirgate {}", dirgate_core::VERSION);
        return Ok(());
    }
    config.validate()?;

    match cli.command {
        Commands::Authenticate { username, password } => authenticate(&config, cli.json, username, password).await,
        Commands::TestConnection => test_connection(&config).await,
        Commands::Search {
            filter,
            base_dn,
            attributes,
            page_size,
        } => search(&config, cli.json, filter, base_dn, attributes, page_size).await,
        Commands::Passwd {
            dn,
            old_password,
            new_password,
        } => passwd(&config, dn, old_password, new_password).await,
        Commands::Version => Ok(()),
    }
}

async fn authenticate(config: &Config, json: bool, username: String, password: String) -> anyhow::Result<()> {
    let handler = create_ldap_authentication_handler(&config.ldap, HandlerCollaborators::default())
        .await
        .context("Unable to create the authentication handler")?;

    let credential = UsernamePasswordCredential::new(username, password);
    if !handler.supports(&credential) {
        handler.close().await;
        bail!("{} does not accept user {}", handler.name(), credential.username);
    }

    let outcome = handler.authenticate(&credential).await;
    handler.close().await;

    match outcome {
        Ok(result) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Authenticated {} via {}", result.principal.id, result.handler_name);
                for (name, values) in &result.principal.attributes {
                    println!("  {}: {}", name, values.join(", "));
                }
            }
            for warning in result.warning_messages() {
                println!("warning: {}", warning);
            }
            Ok(())
        }
        Err(e) => {
            error!("Authentication failed [{}]: {}", e.message_code(), e);
            bail!("{}", e.message_code())
        }
    }
}

async fn test_connection(config: &Config) -> anyhow::Result<()> {
    let factory = new_connection_factory(&config.ldap.connection, Arc::new(Ldap3Connector::new())).await?;
    let outcome = factory.get_connection().await;
    let urls = factory.descriptor().urls().join(" ");
    match outcome {
        Ok(connection) => {
            drop(connection);
            factory.close().await;
            info!("Connection to {} established", urls);
            println!("OK {}", urls);
            Ok(())
        }
        Err(e) => {
            factory.close().await;
            bail!("Unable to connect to {}: {}", urls, e)
        }
    }
}

async fn search(
    config: &Config,
    json: bool,
    filter: String,
    base_dn: Option<String>,
    attributes: Vec<String>,
    page_size: i32,
) -> anyhow::Result<()> {
    let Some(base_dn) = base_dn.or_else(|| config.ldap.base_dns().into_iter().next()) else {
        bail!("No base DN given and none configured");
    };
    let factory = new_connection_factory(&config.ldap.connection, Arc::new(Ldap3Connector::new())).await?;
    let outcome = execute_search_operation(
        factory.as_ref(),
        &base_dn,
        &SearchFilter::new(filter),
        page_size,
        &config.ldap.binary_attributes,
        &attributes,
    )
    .await;
    factory.close().await;

    let response = outcome?;
    if json {
        println!("{}", serde_json::to_string_pretty(&response.entries)?);
    } else {
        for entry in &response.entries {
            print_entry(entry);
        }
        println!("# {} entries", response.entries.len());
    }
    Ok(())
}

fn print_entry(entry: &LdapEntry) {
    println!("dn: {}", entry.dn);
    for attribute in &entry.attributes {
        for value in attribute.display_values() {
            println!("{}: {}", attribute.name, value);
        }
    }
    println!();
}

async fn passwd(config: &Config, dn: String, old_password: String, new_password: String) -> anyhow::Result<()> {
    let factory = new_connection_factory(&config.ldap.connection, Arc::new(Ldap3Connector::new())).await?;
    let changed = execute_password_modify_operation(
        &dn,
        factory.as_ref(),
        &old_password,
        &new_password,
        config.ldap.password_policy.policy_type,
    )
    .await;
    factory.close().await;

    if !changed {
        bail!("Password change for {} failed", dn);
    }
    println!("Password changed for {}", dn);
    Ok(())
}
