use anyhow::Context;
use clap::{Parser, Subcommand};
use mfsclient::{Client, ClientOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mfscli")]
#[command(about = "Command-line client for a MooseFS master", long_about = None)]
struct Cli {
    /// Master address, host[:port]
    #[arg(short, long, global = true, env = "MFS_MASTER")]
    master: Option<String>,

    /// YAML config file; command-line flags override it
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Exported subtree to register for
    #[arg(long, global = true)]
    subdir: Option<String>,

    /// Keep looked-up attributes in the client cache
    #[arg(long, global = true)]
    cache: bool,

    #[command(subcommand)]
    command: Commands,
}

/// One command typed into `mfscli shell`.
#[derive(Parser)]
#[command(name = "mfscli", no_binary_name = true)]
struct ShellLine {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Show attributes of a path")]
    Stat {
        #[arg(value_name = "PATH")]
        path: String,
    },
    #[command(about = "List a directory")]
    Ls {
        #[arg(value_name = "PATH", default_value = "/")]
        path: String,
    },
    #[command(about = "Print a file to stdout")]
    Cat {
        #[arg(value_name = "PATH")]
        path: String,
    },
    #[command(about = "Upload a local file")]
    Put {
        #[arg(value_name = "LOCAL")]
        local: String,
        #[arg(value_name = "PATH")]
        path: String,
    },
    #[command(about = "Create a directory and missing parents")]
    Mkdir {
        #[arg(value_name = "PATH")]
        path: String,
    },
    #[command(about = "Remove a file or empty directory")]
    Rm {
        #[arg(value_name = "PATH")]
        path: String,
    },
    #[command(about = "Show filesystem usage")]
    Statfs,
    #[command(about = "Purge cached attributes below a path")]
    PurgeCache {
        #[arg(value_name = "PATH")]
        path: String,
    },
    #[command(about = "Run commands from stdin over one session, with caching on")]
    Shell,
}

fn options(cli: &Cli) -> anyhow::Result<ClientOptions> {
    let mut opts = match &cli.config {
        Some(path) => ClientOptions::from_file(path)
            .with_context(|| format!("Failed to load config from {path}"))?,
        None => ClientOptions::default(),
    };
    if let Some(master) = &cli.master {
        opts.master_addr = master.clone();
    }
    if let Some(subdir) = &cli.subdir {
        opts.subdir = subdir.clone();
    }
    if cli.cache || matches!(cli.command, Commands::Shell) {
        opts.cache_enabled = true;
    }
    Ok(opts)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let client = Client::new(options(&cli)?)?;
    let result = match cli.command {
        Commands::Shell => shell(&client).await,
        Commands::PurgeCache { path } if client.cache().is_enabled() => {
            // a fresh process has nothing cached yet
            client.stat(&path).await?;
            execute(&client, Commands::PurgeCache { path }).await
        }
        command => execute(&client, command).await,
    };
    client.close().await;
    result
}

async fn shell(client: &Client) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let words = line.split_whitespace().collect::<Vec<_>>();
        if words.is_empty() {
            continue;
        }
        if matches!(words[0], "exit" | "quit") {
            break;
        }
        let command = match ShellLine::try_parse_from(words) {
            Ok(parsed) => parsed.command,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };
        if matches!(command, Commands::Shell) {
            eprintln!("already in a shell");
            continue;
        }
        if let Err(e) = execute(client, command).await {
            eprintln!("Error: {e:#}");
        }
    }
    Ok(())
}

async fn execute(client: &Client, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Stat { path } => {
            let e = client.stat(&path).await?;
            println!(
                "inode: {}\ntype: {:?}\nmode: {:o}\nuid: {} gid: {}\nnlink: {}\nsize: {}\nmtime: {}",
                e.inode,
                e.attr.kind,
                e.attr.mode,
                e.attr.uid,
                e.attr.gid,
                e.attr.nlink,
                e.attr.length,
                e.attr.mtime
            );
        }
        Commands::Ls { path } => {
            for e in client.read_dir(&path).await? {
                println!(
                    "{:>10} {:o} {:>12} {}",
                    e.inode, e.attr.mode, e.attr.length, e.name
                );
            }
        }
        Commands::Cat { path } => {
            let mut file = client.open(&path).await?;
            let mut stdout = tokio::io::stdout();
            let mut buf = vec![0u8; 1 << 20];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                stdout.write_all(&buf[..n]).await?;
            }
            stdout.flush().await?;
        }
        Commands::Put { local, path } => {
            let data = tokio::fs::read(&local)
                .await
                .with_context(|| format!("Failed to read {local}"))?;
            let mut file = client.create(&path).await?;
            file.write(&data).await?;
            file.close().await?;
            println!("{} bytes written to {path}", data.len());
        }
        Commands::Mkdir { path } => client.mkdir_all(&path, 0o755).await?,
        Commands::Rm { path } => client.remove(&path).await?,
        Commands::Statfs => {
            let st = client.statfs().await?;
            println!(
                "total: {}\navail: {}\ntrash: {}\nreserved: {}\ninodes: {}",
                st.total_space, st.avail_space, st.trash_space, st.reserved_space, st.inodes
            );
        }
        Commands::PurgeCache { path } => {
            let n = client.purge_inode_cache(&path).await?;
            println!("Purged {n} cache entries");
        }
        Commands::Shell => anyhow::bail!("shell cannot be nested"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mfsclient=info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    run(cli).await
}
