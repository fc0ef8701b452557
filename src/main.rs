use std::process::ExitCode;

fn main() -> ExitCode {
    match met_xy_corrs::app::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::from(err.exit_code())
        }
    }
}
