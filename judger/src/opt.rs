use clap::{Args, Parser, Subcommand};
use mission_judger::config::ExecutionPolicy;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
/// Run and grade learner code locally or on the remote grading service
#[clap(name = "mission-judger", version)]
pub struct Opts {
    #[clap(subcommand)]
    pub cmd: SubCmd,

    #[clap(flatten)]
    pub opt: GlobalOpts,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalOpts {
    /// Configuration file of the judger. Defaults are used when omitted.
    #[clap(long, short, global = true, value_name = "config-file-path")]
    pub config: Option<PathBuf>,

    /// Where code may run: prefer-local, local-only or remote-only.
    /// Overrides the configuration file.
    #[clap(long, global = true)]
    pub policy: Option<ExecutionPolicy>,

    /// Time limit of each execution, in milliseconds.
    #[clap(long, global = true, value_name = "ms")]
    pub timeout: Option<u64>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCmd {
    /// Run a script once and print its result
    #[clap(name = "run")]
    Run(RunSubCmd),

    /// Grade a submission against a test suite
    #[clap(name = "grade")]
    Grade(GradeSubCmd),
}

#[derive(Args, Debug, Clone)]
pub struct RunSubCmd {
    /// The script to run
    #[clap(name = "script")]
    pub script: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct GradeSubCmd {
    /// The submission to grade
    #[clap(name = "submission")]
    pub submission: PathBuf,

    /// Test suite file, either TOML (`[[tests]]`) or JSON
    #[clap(long, short, value_name = "tests-file-path")]
    pub tests: PathBuf,
}
