//! Entry point wiring together the Framed Codec, Message Emitter, Dispatcher
//! and (when a config names back-ends) the Master Router.

use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use itertools::Itertools;
use log::{info, warn};

use lspmux::backend::NullLanguageHandler;
use lspmux::config::{BackendAddr, Config};
use lspmux::dispatcher::Dispatcher;
use lspmux::emitter::MessageEmitter;
use lspmux::router::{Connection, MasterRouter};
use lspmux::transport::{self, Options};

fn main() {
    let exit_code = main_inner();
    std::process::exit(exit_code);
}

fn main_inner() -> i32 {
    env_logger::init();

    let options = match transport::parse_args(env::args().skip(1)) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("{}", err);
            eprintln!("{}", help());
            return 101;
        }
    };

    let config = load_config();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to start the async runtime: {}", err);
            return 101;
        }
    };

    match runtime.block_on(run_server(options, config)) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{:#}", err);
            101
        }
    }
}

async fn run_server(options: Options, config: Config) -> Result<()> {
    let transport = transport::acquire(&options).await.context("failed to acquire a transport")?;

    let framed = lspmux::codec::frame(transport);
    let (writer, reader) = lspmux::codec::split(framed);
    let emitter = MessageEmitter::spawn(reader);

    let handlers = match (config.light_backend.as_ref(), config.heavy_backend.as_ref()) {
        (Some(light), Some(heavy)) => {
            info!("running as a master, routing to light={:?} heavy={:?}", light, heavy);
            connect_router(light, heavy).await.context("failed to connect to a configured back-end")?.handlers()
        }
        _ => {
            info!("running standalone against a null language handler");
            lspmux::handler_table_for(Arc::new(NullLanguageHandler))
        }
    };

    let dispatcher = Dispatcher::new(handlers, writer).with_default_streaming(config.default_streaming);
    dispatcher.run(emitter.subscribe()).await;
    Ok(())
}

/// Connects to both of the Master Router's back-ends and wires up their
/// `Connection`s. Each back-end answers `workspace/xfiles`/`textDocument/xcontent`
/// reverse requests by itself -- this standalone binary has no front
/// connection of its own to proxy those through, so it just runs with an
/// empty reverse table; a genuine master/worker deployment wires that
/// through `lspmux::router::reverse_handlers`.
async fn connect_router(light: &BackendAddr, heavy: &BackendAddr) -> Result<MasterRouter> {
    let light = dial(light).await.context("failed to dial the light back-end")?;
    let heavy = dial(heavy).await.context("failed to dial the heavy back-end")?;
    Ok(MasterRouter::new(light, heavy))
}

async fn dial(addr: &BackendAddr) -> Result<Connection> {
    let duplex: Box<dyn lspmux::transport::Duplex> = match addr {
        BackendAddr::Stdio => Box::new(tokio::io::join(tokio::io::stdin(), tokio::io::stdout())),
        BackendAddr::Tcp { host, port } => {
            let stream = tokio::net::TcpStream::connect((host.as_str(), *port)).await?;
            Box::new(stream)
        }
    };

    let framed = lspmux::codec::frame(duplex);
    let (writer, reader) = lspmux::codec::split(framed);
    let writer = Arc::new(tokio::sync::Mutex::new(writer));
    let connection = Connection::new(writer);

    let emitter = MessageEmitter::spawn(reader);
    connection.spawn_reader(emitter.subscribe(), Arc::new(lspmux::handler::HandlerTable::new()));

    Ok(connection)
}

/// Reads process configuration, preferring a TOML file named by
/// `LSPMUX_CONFIG_FILE` (matching the teacher's own preference for TOML
/// config on disk) and falling back to a JSON blob in the `LSPMUX_CONFIG`
/// environment variable (the way `rls` itself takes its settings inline as
/// `initialize` options, with no file at all). Unknown or duplicate keys are
/// warned about but never fatal.
fn load_config() -> Config {
    let value = if let Ok(path) = env::var("LSPMUX_CONFIG_FILE") {
        match std::fs::read_to_string(&path).ok().and_then(|raw| toml::from_str::<toml::Value>(&raw).ok()) {
            Some(toml_value) => match serde_json::to_value(toml_value) {
                Ok(value) => value,
                Err(err) => {
                    warn!("{} did not convert cleanly to the expected shape, using defaults: {}", path, err);
                    return Config::default();
                }
            },
            None => {
                warn!("could not read or parse {} as TOML, using defaults", path);
                return Config::default();
            }
        }
    } else if let Ok(raw) = env::var("LSPMUX_CONFIG") {
        match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(err) => {
                warn!("LSPMUX_CONFIG is not valid JSON, ignoring: {}", err);
                return Config::default();
            }
        }
    } else {
        return Config::default();
    };

    let mut dups = std::collections::HashMap::new();
    let mut unknowns = Vec::new();
    match Config::try_deserialize(&value, &mut dups, &mut unknowns) {
        Ok(config) => {
            for (key, spellings) in &dups {
                warn!("configuration has duplicate keys for `{}`: {}", key, spellings.iter().join(", "));
            }
            if !unknowns.is_empty() {
                warn!("configuration has unknown keys: {}", unknowns.iter().join(", "));
            }
            config
        }
        Err(()) => {
            warn!("configuration did not match the expected shape, using defaults");
            Config::default()
        }
    }
}

fn help() -> &'static str {
    r#"
    --strict            run the virtual file system in remote mode
    --listen ADDR:PORT  accept one TCP connection instead of using stdio
    No other arguments are supported; configuration is read from a TOML
    file named by LSPMUX_CONFIG_FILE, or else a JSON blob in LSPMUX_CONFIG.
    "#
}
