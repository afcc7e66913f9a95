//! fitrank - command-line front end for the fitrank session core.
//!
//! Stands in for the app's screens: validates input, then calls the shared
//! `SessionManager` for login, logout, profile and authenticated requests.

use std::io::{self, BufRead, Write};

use anyhow::{bail, Context, Result};
use fitrank_core::api::Method;
use fitrank_core::{Config, RequestOptions, SessionError, SessionManager, UserSnapshot};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ============================================================================
// Constants
// ============================================================================

/// Minimum password length accepted by the registration form.
const MIN_PASSWORD_LENGTH: usize = 6;

/// Rolling log file prefix in the cache directory
const LOG_FILE_NAME: &str = "fitrank.log";

const USAGE: &str = "\
Usage: fitrank <command>

Commands:
  login [email]                        Log in (prompts for anything missing)
  logout                               Clear the stored session
  status                               Show whether a session is stored
  profile                              Fetch and cache the user profile
  request <METHOD> <endpoint> [json]   Send an authenticated request
  help                                 Show this message";

#[derive(Debug, PartialEq)]
enum Command {
    Login { email: Option<String> },
    Logout,
    Status,
    Profile,
    Request {
        method: Method,
        endpoint: String,
        body: Option<String>,
    },
    Help,
}

/// Initialize the tracing subscriber for logging
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let log_dir = Config::cache_dir().and_then(|dir| {
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    });
    let (file_layer, guard) = match log_dir {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_args(&args)?;
    if command == Command::Help {
        println!("{}", USAGE);
        return Ok(());
    }

    let mut config = Config::load().context("Failed to load config")?;
    let session = SessionManager::from_config(&config)?;
    info!(base_url = session.base_url(), store = ?config.store, "fitrank starting");

    let result = run(command, &session, &mut config).await;
    if let Err(ref e) = result {
        if e
            .downcast_ref::<SessionError>()
            .is_some_and(SessionError::needs_reauthentication)
        {
            eprintln!("Run `fitrank login` to sign in again.");
        }
    }
    result
}

async fn run(command: Command, session: &SessionManager, config: &mut Config) -> Result<()> {
    match command {
        Command::Login { email } => {
            let email = match email.or_else(|| config.last_email.clone()) {
                Some(email) => email,
                None => prompt("Email: ")?,
            };
            let password =
                rpassword::prompt_password("Password: ").context("Failed to read password")?;

            if let Err(msg) = validate_email(&email) {
                bail!("Email: {}", msg);
            }
            if let Err(msg) = validate_password(&password) {
                bail!("Password: {}", msg);
            }

            let data = session.login(email.trim(), &password).await?;
            match data.user {
                Some(ref user) => println!("Logged in as {}", describe_user(user)),
                None => println!("Logged in"),
            }

            config.last_email = Some(email.trim().to_string());
            config.save().context("Failed to save config")?;
        }
        Command::Logout => {
            session.logout().await;
            println!("Logged out");
        }
        Command::Status => {
            if session.is_authenticated() {
                match session.user_data() {
                    Some(user) => println!("Logged in as {}", describe_user(&user)),
                    None => println!("Logged in"),
                }
            } else {
                println!("Not logged in");
            }
        }
        Command::Profile => {
            let user = session.refresh_user_profile().await?;
            println!("{}", serde_json::to_string_pretty(&user)?);
        }
        Command::Request {
            method,
            endpoint,
            body,
        } => {
            let mut options = RequestOptions::new(method);
            if let Some(body) = body {
                let value: serde_json::Value =
                    serde_json::from_str(&body).context("Request body must be valid JSON")?;
                options = options.json(&value)?;
            }

            let response = session.authenticated_request(&endpoint, options).await?;
            println!("{}", response.status());
            match response.json::<serde_json::Value>() {
                Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
                Err(_) => println!("{}", response.text()),
            }
        }
        Command::Help => println!("{}", USAGE),
    }
    Ok(())
}

fn parse_args(args: &[String]) -> Result<Command> {
    let Some(name) = args.first() else {
        return Ok(Command::Help);
    };
    let rest = &args[1..];

    let command = match (name.as_str(), rest) {
        ("login", []) => Command::Login { email: None },
        ("login", [email]) => Command::Login {
            email: Some(email.clone()),
        },
        ("logout", []) => Command::Logout,
        ("status", []) => Command::Status,
        ("profile", []) => Command::Profile,
        ("request", [method, endpoint, body @ ..]) if body.len() <= 1 => {
            let method = Method::from_bytes(method.to_uppercase().as_bytes())
                .with_context(|| format!("Invalid HTTP method: {}", method))?;
            Command::Request {
                method,
                endpoint: endpoint.clone(),
                body: body.first().cloned(),
            }
        }
        ("help" | "--help" | "-h", _) => Command::Help,
        _ => bail!("Unrecognized arguments: {}\n\n{}", args.join(" "), USAGE),
    };
    Ok(command)
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Field-level email check, done before any network call.
fn validate_email(email: &str) -> Result<(), &'static str> {
    let email = email.trim();
    if email.is_empty() {
        return Err("is required");
    }
    let Some((local, domain)) = email.split_once('@') else {
        return Err("must contain @");
    };
    if local.is_empty() || domain.contains('@') {
        return Err("is not a valid address");
    }
    let Some((host, tld)) = domain.rsplit_once('.') else {
        return Err("domain must contain a dot");
    };
    if host.is_empty() || tld.is_empty() || email.chars().any(char::is_whitespace) {
        return Err("is not a valid address");
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), &'static str> {
    if password.is_empty() {
        Err("is required")
    } else if password.chars().count() < MIN_PASSWORD_LENGTH {
        Err("must be at least 6 characters")
    } else {
        Ok(())
    }
}

fn describe_user(user: &UserSnapshot) -> String {
    match user.role {
        Some(ref role) => format!("{} ({})", user.display_name(), role),
        None => user.display_name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args_commands() {
        assert_eq!(parse_args(&[]).unwrap(), Command::Help);
        assert_eq!(
            parse_args(&args(&["login"])).unwrap(),
            Command::Login { email: None }
        );
        assert_eq!(
            parse_args(&args(&["login", "a@b.com"])).unwrap(),
            Command::Login {
                email: Some("a@b.com".to_string())
            }
        );
        assert_eq!(parse_args(&args(&["logout"])).unwrap(), Command::Logout);
        assert_eq!(parse_args(&args(&["status"])).unwrap(), Command::Status);
        assert_eq!(parse_args(&args(&["profile"])).unwrap(), Command::Profile);
        assert_eq!(parse_args(&args(&["--help"])).unwrap(), Command::Help);
    }

    #[test]
    fn test_parse_args_request() {
        assert_eq!(
            parse_args(&args(&["request", "post", "/activities", r#"{"minutes":30}"#])).unwrap(),
            Command::Request {
                method: Method::POST,
                endpoint: "/activities".to_string(),
                body: Some(r#"{"minutes":30}"#.to_string()),
            }
        );
        assert_eq!(
            parse_args(&args(&["request", "GET", "/rankings"])).unwrap(),
            Command::Request {
                method: Method::GET,
                endpoint: "/rankings".to_string(),
                body: None,
            }
        );
    }

    #[test]
    fn test_parse_args_rejects_garbage() {
        assert!(parse_args(&args(&["dance"])).is_err());
        assert!(parse_args(&args(&["logout", "now"])).is_err());
        assert!(parse_args(&args(&["request", "GET"])).is_err());
        assert!(parse_args(&args(&["request", "GET", "/x", "{}", "extra"])).is_err());
        assert!(parse_args(&args(&["request", "GE T", "/x"])).is_err());
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("a@b.com").is_ok());
        assert!(validate_email("  student@school.edu ").is_ok());

        assert_eq!(validate_email(""), Err("is required"));
        assert_eq!(validate_email("ab.com"), Err("must contain @"));
        assert_eq!(validate_email("@b.com"), Err("is not a valid address"));
        assert_eq!(validate_email("a@b@c.com"), Err("is not a valid address"));
        assert_eq!(validate_email("a@localhost"), Err("domain must contain a dot"));
        assert_eq!(validate_email("a@.com"), Err("is not a valid address"));
        assert_eq!(validate_email("a b@c.com"), Err("is not a valid address"));
    }

    #[test]
    fn test_validate_password() {
        assert!(validate_password("secret1").is_ok());
        assert_eq!(validate_password(""), Err("is required"));
        assert_eq!(validate_password("abc"), Err("must be at least 6 characters"));
    }

    #[test]
    fn test_describe_user() {
        let user: UserSnapshot =
            serde_json::from_str(r#"{"id":"1","name":"A","email":"a@b.com","role":"teacher"}"#)
                .unwrap();
        assert_eq!(describe_user(&user), "A (teacher)");
    }
}
