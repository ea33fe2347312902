//! Pieces shared by every crate in the workspace: machine word helpers, the command line
//! option groups and logging bootstrap.

pub mod cli;
pub mod util;

pub use util::WORD_BYTES;

/// Install the `env_logger` backend.
///
/// `verbose` is the number of `-v` flags given on the command line. `RUST_LOG` still wins
/// when it is set, so individual crates can be filtered the usual way.
pub fn init_logging(verbose: u8) -> Result<(), anyhow::Error> {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env = env_logger::Env::default()
        .filter_or("RUST_LOG", level)
        .write_style_or("RUST_LOG_STYLE", "auto");

    env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .try_init()?;

    log::debug!("logging initialised at {}", level);
    Ok(())
}
