use clap::{Parser, Subcommand};
use eyre::{ensure, Context, Result};
use libc::{tcsetattr, STDIN_FILENO, TCSAFLUSH};
use std::io::Write;
use std::mem::MaybeUninit;
use std::path::PathBuf;
use tracing::trace;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vaultfs::{
    config::{Geometry, StoreParams},
    DiskMedium, KdfIterations, Store, StoreConfig, VirtualPath,
};

fn getpass() -> Result<String> {
    let isatty = unsafe { libc::isatty(STDIN_FILENO) == 1 };
    let mut password = String::new();
    if isatty {
        unsafe {
            let mut old = MaybeUninit::<libc::termios>::uninit();
            let err = libc::tcgetattr(STDIN_FILENO, old.as_mut_ptr());
            ensure!(err == 0, "tcgetattr failed for stdin, but isatty is true");
            let mut new = old.assume_init();
            new.c_lflag &= !libc::ECHO;
            tcsetattr(STDIN_FILENO, TCSAFLUSH, &new);
            std::io::stdin().read_line(&mut password)?;
            tcsetattr(STDIN_FILENO, TCSAFLUSH, old.as_ptr());
        }
    } else {
        std::io::stdin().read_line(&mut password)?;
    }
    let endl = password.pop();
    ensure!(endl == Some('\n'), "Readline returned invalid string");
    ensure!(!password.is_empty(), "Password cannot be empty");
    Ok(password)
}

/// Prompts for the password unless it was given on the command line.
/// A new store asks twice.
fn ask_for_pass_or_cli(password: Option<String>, new_store: bool) -> Result<String> {
    if let Some(password) = password {
        return Ok(password);
    }
    print!("Please enter your password: ");
    std::io::stdout().flush()?;
    let password = getpass()?;
    println!();
    if new_store {
        print!("Please repeat the password: ");
        std::io::stdout().flush()?;
        let password_repeat = getpass()?;
        println!();
        ensure!(password == password_repeat, "Passwords don't match");
    }
    Ok(password)
}

#[derive(Parser)]
#[command(version, about = "Encrypted, chunked and parity protected file store")]
struct Cli {
    /// Directory holding the store, e.g. an SD card mount point
    #[arg(short = 'd', long, default_value = ".")]
    dir: PathBuf,
    /// Name of the store folder inside `dir`, also the key derivation salt
    #[arg(short = 'r', long, default_value = "secure")]
    root: String,
    #[arg(short = 'p', long)]
    password: Option<String>,
    /// Only used when the store is created
    #[arg(long, default_value_t = Geometry::DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,
    /// Only used when the store is created
    #[arg(long, default_value_t = Geometry::DEFAULT_PARITY_GROUP)]
    parity_group: usize,
    /// Only used when the store is created
    #[arg(long)]
    kdf_iterations: Option<u32>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    Mkdir {
        #[arg(index = 1)]
        path: String,
    },
    Ls {
        #[arg(index = 1, default_value = "/")]
        path: String,
    },
    /// Recursive listing
    Tree {
        #[arg(index = 1, default_value = "/")]
        path: String,
    },
    /// Copy a local file into the store
    Put {
        #[arg(index = 1)]
        local: PathBuf,
        #[arg(index = 2)]
        path: String,
    },
    /// Copy a file out of the store, to stdout without a target
    Get {
        #[arg(index = 1)]
        path: String,
        #[arg(index = 2)]
        local: Option<PathBuf>,
    },
    Rm {
        #[arg(index = 1)]
        path: String,
    },
    Rmdir {
        #[arg(index = 1)]
        path: String,
    },
    Info {
        #[arg(index = 1)]
        path: String,
    },
}

fn vpath(path: &str) -> Result<VirtualPath> {
    path.parse::<VirtualPath>()
        .wrap_err_with(|| format!("Invalid store path {path:?}"))
}

fn open_store(cli: &Cli) -> Result<Store<DiskMedium>> {
    ensure!(cli.dir.is_dir(), "store directory {:?} does not exist", cli.dir);
    let mut config = StoreConfig {
        chunk_size: cli.chunk_size,
        parity_group: cli.parity_group,
        ..StoreConfig::default()
    };
    if let Some(iterations) = cli.kdf_iterations {
        config.kdf = KdfIterations::Fixed(iterations);
    }
    let new_store = !cli
        .dir
        .join(&cli.root)
        .join(StoreParams::FILE_NAME)
        .is_file();
    let password = ask_for_pass_or_cli(cli.password.clone(), new_store)?;
    Store::open(DiskMedium::new(&cli.dir), config, &cli.root, &password)
        .wrap_err_with(|| format!("Failed to open store {:?} in {:?}", cli.root, cli.dir))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();
    trace!("Starting up vaultfs cli");
    let store = open_store(&cli)?;
    match &cli.command {
        Command::Mkdir { path } => {
            store
                .create_dir(&vpath(path)?)
                .wrap_err("Failed to create directory")?;
        }
        Command::Ls { path } => {
            for entry in store.read_dir(&vpath(path)?).wrap_err("Failed to list directory")? {
                if entry.is_dir {
                    println!("{}/", entry.name);
                } else {
                    println!("{:>10}  {}", entry.size, entry.name);
                }
            }
        }
        Command::Tree { path } => {
            let base = vpath(path)?;
            println!("{base}");
            let depth = base.segments().len();
            for (path, entry) in store.walk(&base).wrap_err("Failed to walk directory")? {
                let indent = "  ".repeat(path.segments().len() - depth);
                let suffix = if entry.is_dir { "/" } else { "" };
                println!("{indent}{}{suffix}", entry.name);
            }
        }
        Command::Put { local, path } => {
            let data = std::fs::read(local).wrap_err_with(|| format!("Couldn't read {local:?}"))?;
            store
                .write_file(&vpath(path)?, &data)
                .wrap_err("Failed to write file")?;
        }
        Command::Get { path, local } => {
            let data = store.read_file(&vpath(path)?).wrap_err("Failed to read file")?;
            match local {
                Some(local) => std::fs::write(local, &data)
                    .wrap_err_with(|| format!("Couldn't write {local:?}"))?,
                None => std::io::stdout().write_all(&data)?,
            }
        }
        Command::Rm { path } => {
            store.delete_file(&vpath(path)?).wrap_err("Failed to delete file")?;
        }
        Command::Rmdir { path } => {
            store
                .delete_dir(&vpath(path)?)
                .wrap_err("Failed to delete directory")?;
        }
        Command::Info { path } => {
            let path = vpath(path)?;
            let info = store.info(&path).wrap_err("Failed to stat path")?;
            let kind = if info.is_dir { "directory" } else { "file" };
            println!("{path}: {kind}, {} bytes", info.size);
            println!("physical id: {}", store.physical_id(&path)?);
        }
    }
    Ok(())
}
