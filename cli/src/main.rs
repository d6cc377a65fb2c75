use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args, Parser, Subcommand};
use fusiondirectory::{
    AttrSelector, AttributeRequest, ClientConfig, Credentials, ErrorCode, FdClient, FdError, SessionCarrier,
    TabValues, Timeouts,
};
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{code}: {0}", code = .0.error_code())]
    Fd(#[from] FdError),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("failed to read .env: {0}")]
    DotEnv(#[from] dotenvy::Error),
    #[error("expected a JSON array of params")]
    ParamsNotArray,
}

#[derive(Parser, Debug)]
#[command(name = "fd-cli", about = "FusionDirectory webservice CLI")]
struct Cli {
    #[command(flatten)]
    conn: ConnectionArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct ConnectionArgs {
    #[arg(long, env = "FD_HOST")]
    host: String,

    #[arg(long, env = "FD_USER")]
    user: String,

    #[arg(long, env = "FD_PASSWORD", hide_env_values = true)]
    password: String,

    #[arg(long, env = "FD_DATABASE", default_value = "default")]
    database: String,

    /// Validate the server's TLS certificate.
    #[arg(long, env = "FD_VERIFY_CERT", action = ArgAction::Set, default_value_t = true, value_parser = BoolishValueParser::new())]
    verify_cert: bool,

    /// Refuse plain `http://` hosts.
    #[arg(long, env = "FD_ENFORCE_ENCRYPTION", action = ArgAction::Set, default_value_t = true, value_parser = BoolishValueParser::new())]
    enforce_encryption: bool,

    /// Shorthand for `--verify-cert false`.
    #[arg(long, default_value_t = false)]
    insecure: bool,

    /// Shorthand for `--enforce-encryption false`.
    #[arg(long, default_value_t = false)]
    allow_http: bool,

    /// Log in before running the command (`databases` never does).
    #[arg(long, env = "FD_LOGIN", action = ArgAction::Set, default_value_t = true, value_parser = BoolishValueParser::new())]
    login: bool,

    #[arg(long, env = "FD_CLIENT_ID", default_value = "rust_api_wrapper")]
    client_id: String,

    /// `parameter` (token as first param) or `cookie`.
    #[arg(long, env = "FD_SESSION_CARRIER", default_value = "parameter")]
    session_carrier: SessionCarrier,

    #[arg(long, env = "FD_REQUEST_TIMEOUT_SECS", default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    timeout_secs: u64,

    #[arg(long, env = "FD_CONNECT_TIMEOUT_SECS", default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    connect_timeout_secs: u64,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// LDAP databases the server manages (no login needed).
    Databases,
    Types,
    Tabs {
        object_type: String,
        #[arg(long)]
        dn: Option<String>,
    },
    Info {
        object_type: String,
    },
    Fields {
        object_type: String,
        #[arg(long)]
        dn: Option<String>,
        #[arg(long)]
        tab: Option<String>,
    },
    Template {
        object_type: String,
        template_dn: String,
    },
    /// List objects. Attributes are `name` or `name=selector` (`1`, `*`, `raw`, `b64`).
    Ls {
        object_type: String,
        #[arg(long = "attr", value_parser = parse_attr)]
        attrs: Vec<(String, AttrSelector)>,
        #[arg(long)]
        ou: Option<String>,
        #[arg(long)]
        filter: Option<String>,
    },
    Get {
        object_type: String,
        dn: String,
        #[arg(long = "attr", value_parser = parse_attr)]
        attrs: Vec<(String, AttrSelector)>,
    },
    Count {
        object_type: String,
        #[arg(long)]
        ou: Option<String>,
        #[arg(long)]
        filter: Option<String>,
    },
    Base,
    SessionId,
    /// Create an object from `{"tab": {"attr": value}}`.
    Create {
        object_type: String,
        #[arg(long)]
        values: String,
        #[arg(long)]
        template: Option<String>,
    },
    Update {
        object_type: String,
        dn: String,
        #[arg(long)]
        values: String,
    },
    Delete {
        object_type: String,
        dn: String,
    },
    DeleteTab {
        object_type: String,
        dn: String,
        tab: String,
    },
    Lock {
        dn: String,
    },
    Unlock {
        dn: String,
    },
    Locked {
        dn: String,
    },
    RecoveryToken {
        email: String,
    },
    SetPassword {
        uid: String,
        #[arg(long)]
        token: String,
        #[arg(long, env = "FD_NEW_PASSWORD", hide_env_values = true)]
        new_password: String,
    },
    /// Call any webservice method within the session.
    Call {
        method: String,
        #[arg(long, default_value = "[]")]
        params: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    match dotenvy::dotenv() {
        Ok(_) => {}
        Err(err) if err.not_found() => {}
        Err(err) => return Err(err.into()),
    }
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = client_config(cli.conn, &cli.command);
    let mut client = FdClient::connect(config).await?;

    let outcome = run(&mut client, cli.command).await;
    if client.is_authenticated() {
        if let Err(err) = client.logout().await {
            tracing::warn!(error = %err, "logout failed");
        }
    }
    print_json(&outcome?)
}

fn client_config(conn: ConnectionArgs, command: &Command) -> ClientConfig {
    let mut config = ClientConfig::new(conn.host, Credentials::new(conn.user, conn.password, conn.database));
    config.verify_cert = conn.verify_cert && !conn.insecure;
    config.enforce_encryption = conn.enforce_encryption && !conn.allow_http;
    config.client_id = conn.client_id;
    config.login = conn.login && !matches!(command, Command::Databases);
    config.session_carrier = conn.session_carrier;
    config.timeouts = Timeouts { request_secs: conn.timeout_secs, connect_secs: conn.connect_timeout_secs };
    config
}

async fn run(client: &mut FdClient, command: Command) -> Result<Value, CliError> {
    let value = match command {
        Command::Databases => to_json(&client.list_databases().await?)?,
        Command::Types => to_json(&client.list_object_types().await?)?,
        Command::Tabs { object_type, dn } => to_json(&client.list_tabs(&object_type, dn.as_deref()).await?)?,
        Command::Info { object_type } => Value::Object(client.object_type_info(&object_type).await?),
        Command::Fields { object_type, dn, tab } => {
            client.get_fields(&object_type, dn.as_deref(), tab.as_deref()).await?
        }
        Command::Template { object_type, template_dn } => client.get_template(&object_type, &template_dn).await?,
        Command::Ls { object_type, attrs, ou, filter } => {
            let attrs = attrs.into_iter().collect::<AttributeRequest>();
            let objects = client
                .get_objects(&object_type, &attrs, ou.as_deref(), filter.as_deref())
                .await?;
            to_json(&objects)?
        }
        Command::Get { object_type, dn, attrs } => {
            let attrs = attrs.into_iter().collect::<AttributeRequest>();
            to_json(&client.get_object(&object_type, &dn, &attrs).await?)?
        }
        Command::Count { object_type, ou, filter } => {
            to_json(&client.count_objects(&object_type, ou.as_deref(), filter.as_deref()).await?)?
        }
        Command::Base => Value::String(client.get_base().await?),
        Command::SessionId => Value::String(client.server_session_id().await?),
        Command::Create { object_type, values, template } => {
            let values = serde_json::from_str::<TabValues>(&values)?;
            Value::String(client.create_object(&object_type, &values, template.as_deref()).await?)
        }
        Command::Update { object_type, dn, values } => {
            let values = serde_json::from_str::<TabValues>(&values)?;
            Value::String(client.update_object(&object_type, &dn, &values).await?)
        }
        Command::Delete { object_type, dn } => {
            client.delete_object(&object_type, &dn).await?;
            Value::Bool(true)
        }
        Command::DeleteTab { object_type, dn, tab } => {
            Value::String(client.delete_tab(&object_type, &dn, &tab).await?)
        }
        Command::Lock { dn } => {
            client.lock_user(&dn).await?;
            Value::Bool(true)
        }
        Command::Unlock { dn } => {
            client.unlock_user(&dn).await?;
            Value::Bool(true)
        }
        Command::Locked { dn } => Value::Bool(client.user_is_locked(&dn).await?),
        Command::RecoveryToken { email } => Value::String(client.get_recovery_token(&email).await?),
        Command::SetPassword { uid, token, new_password } => {
            client.set_password(&uid, &new_password, &token).await?;
            Value::Bool(true)
        }
        Command::Call { method, params } => {
            let Value::Array(params) = serde_json::from_str::<Value>(&params)? else {
                return Err(CliError::ParamsNotArray);
            };
            client.call(&method, params).await?
        }
    };
    Ok(value)
}

fn parse_attr(raw: &str) -> Result<(String, AttrSelector), String> {
    let (name, selector) = match raw.split_once('=') {
        Some((name, selector)) => (name.trim(), AttrSelector::from_wire(selector)),
        None => (raw.trim(), AttrSelector::Single),
    };
    if name.is_empty() {
        return Err(format!("missing attribute name in `{raw}`"));
    }
    Ok((name.to_owned(), selector))
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, CliError> {
    Ok(serde_json::to_value(value)?)
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
