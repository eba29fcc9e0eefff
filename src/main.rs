use std::process;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Arg, ArgMatches, Command};
use tracing::{error, info};

use kbfs_blockcache::cache::types::BlockId;
use kbfs_blockcache::core::config::{LogLevel, RemoteCacheConfig};
use kbfs_blockcache::identity;
use kbfs_blockcache::rpc::{CacheService, UnixSocketFactory};
use kbfs_blockcache::{BlockCache, CallContext, DiskBlockCacheRemote, MemoryBlockCache, ServerHalf, TlfId, Uid};

/// 解析命令行参数
fn build_cli() -> Command {
    let socket_arg = Arg::new("socket")
        .short('s')
        .long("socket")
        .help("Block cache service socket path")
        .value_name("PATH")
        .action(clap::ArgAction::Set);

    Command::new("kbfs-blockcache")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Block cache tier tools: UID derivation and remote block cache access")
        .arg(
            Arg::new("options")
                .short('o')
                .long("options")
                .help("Options (comma-separated key=value)")
                .value_name("OPTIONS")
                .global(true)
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("debug")
                .short('d')
                .long("debug")
                .help("Enable debug logging")
                .global(true)
                .action(clap::ArgAction::SetTrue),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("uid")
                .about("Derive the UID for a username")
                .arg(Arg::new("username").required(true).index(1)),
        )
        .subcommand(
            Command::new("check-uid")
                .about("Check that a UID matches a username")
                .arg(Arg::new("uid").required(true).index(1))
                .arg(Arg::new("username").required(true).index(2)),
        )
        .subcommand(
            Command::new("serve")
                .about("Run an in-memory block cache service")
                .arg(socket_arg.clone()),
        )
        .subcommand(
            Command::new("get")
                .about("Fetch a block from the cache service")
                .arg(socket_arg.clone())
                .arg(Arg::new("tlf").required(true).index(1))
                .arg(Arg::new("block").required(true).index(2)),
        )
        .subcommand(
            Command::new("put")
                .about("Store a file as a block in the cache service")
                .arg(socket_arg)
                .arg(Arg::new("tlf").required(true).index(1))
                .arg(Arg::new("file").required(true).index(2)),
        )
}

fn load_config(matches: &ArgMatches) -> Result<RemoteCacheConfig> {
    let options: Vec<&str> = matches
        .get_one::<String>("options")
        .map(|s| s.split(',').map(str::trim).filter(|o| !o.is_empty()).collect())
        .unwrap_or_default();
    let mut config = RemoteCacheConfig::from_options(&options)?;
    if matches.get_flag("debug") {
        config.log_level = LogLevel::Debug;
    }
    Ok(config)
}

/// 初始化日志系统
fn init_logging(level: LogLevel) {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::from(level))
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a str> {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("missing argument: {}", name))
}

fn apply_socket(mut config: RemoteCacheConfig, matches: &ArgMatches) -> RemoteCacheConfig {
    if let Some(path) = matches.get_one::<String>("socket") {
        config.socket_path = path.into();
    }
    config
}

async fn connect(config: &RemoteCacheConfig) -> Result<DiskBlockCacheRemote> {
    let factory = UnixSocketFactory::from_config(config);
    DiskBlockCacheRemote::new(&factory, config)
        .await
        .with_context(|| format!("connecting to {}", config.socket_path.display()))
}

async fn run(matches: ArgMatches, config: RemoteCacheConfig) -> Result<()> {
    match matches.subcommand() {
        Some(("uid", sub)) => {
            let uid = identity::derive(required(sub, "username")?);
            println!("{}", uid);
        }
        Some(("check-uid", sub)) => {
            let uid: Uid = required(sub, "uid")?.parse()?;
            identity::validate(&uid, required(sub, "username")?)?;
            println!("ok ({})", uid.scheme());
        }
        Some(("serve", sub)) => {
            let config = apply_socket(config, sub);
            let cache: Arc<dyn BlockCache> = Arc::new(MemoryBlockCache::new(config.memory_limit_bytes));
            let service = Arc::new(CacheService::new(cache));
            let listener = CacheService::bind(&config.socket_path)?;
            info!("Serving block cache on {}", config.socket_path.display());

            let signal_service = Arc::clone(&service);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received SIGINT, shutting down...");
                    signal_service.shutdown();
                }
            });

            service.serve(listener).await?;
            let _ = std::fs::remove_file(&config.socket_path);
        }
        Some(("get", sub)) => {
            let config = apply_socket(config, sub);
            let tlf = TlfId::parse(required(sub, "tlf")?)?;
            let block_id = BlockId::parse(required(sub, "block")?)?;
            let remote = connect(&config).await?;
            let ctx = CallContext::background();

            let result = remote.get(&ctx, &tlf, &block_id).await;
            remote.shutdown(&ctx).await;
            let block = result?;
            println!(
                "{} bytes, prefetch={:?}, verified={}",
                block.buf.len(),
                block.prefetch_status,
                block_id.verify_contents(&block.buf)
            );
        }
        Some(("put", sub)) => {
            let config = apply_socket(config, sub);
            let tlf = TlfId::parse(required(sub, "tlf")?)?;
            let data = tokio::fs::read(required(sub, "file")?).await?;
            let block_id = BlockId::from_contents(&data);
            let remote = connect(&config).await?;
            let ctx = CallContext::background();

            let result = remote.put(&ctx, &tlf, &block_id, &data, &ServerHalf::random()).await;
            remote.shutdown(&ctx).await;
            result?;
            println!("{}", block_id);
        }
        _ => return Err(anyhow!("unknown command")),
    }
    Ok(())
}

/// 主函数
#[tokio::main]
async fn main() {
    let matches = build_cli().get_matches();

    let config = match load_config(&matches) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            process::exit(2);
        }
    };
    init_logging(config.log_level);

    if let Err(e) = run(matches, config).await {
        error!("{:#}", e);
        process::exit(1);
    }
}
