use std::process::ExitCode;

fn main() -> ExitCode {
    match cora::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error[{}]: {}", e.category(), e);
            if let Some(hint) = e.remediation() {
                eprintln!("  hint: {}", hint);
            }
            ExitCode::FAILURE
        }
    }
}
