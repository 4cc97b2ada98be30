use clap::{Args, ArgAction};

#[derive(Debug, Args)]
#[clap(next_help_heading = "Global Options")]
pub struct GlobalOpts {
    /// Log filter, in `tracing_subscriber::EnvFilter` syntax (e.g. `r3000a=debug`)
    #[arg(long, global = true, default_value = "warn")]
    pub log: String,

    /// Path to a 512 KiB BIOS image
    #[arg(long, short, global = true)]
    pub bios: Option<std::path::PathBuf>,

    /// Print every executed block address
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    pub trace: bool,
}
