use std::path::PathBuf;

use clap::Parser;

/// `sf_http <work_dir> <job_no> <FSA_id> <FSA_pos> <msg_name> [flags]`
/// (spec §6).
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    pub work_dir: PathBuf,
    pub job_no: u32,
    pub fsa_id: i32,
    pub fsa_pos: usize,
    pub msg_name: PathBuf,

    #[clap(short = 'a', help = "Age limit in seconds for files eligible to be sent")]
    pub age_limit: Option<u32>,

    #[clap(short = 'A', help = "Disable archiving for this run")]
    pub disable_archive: bool,

    #[clap(short = 'o', help = "Retry count carried from a previous failed attempt", default_value_t = 0)]
    pub retries: u32,

    #[clap(short = 'r', help = "Resend from archive instead of the batch directory")]
    pub resend_from_archive: bool,

    #[clap(short = 't', help = "Temporarily toggle the active host for this run")]
    pub temp_toggle: bool,

    #[clap(long, help = "Enable debug-level tracing output")]
    pub debug: bool,
}
