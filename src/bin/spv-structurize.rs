use lazy_static::lazy_static;
use spv_structurize::{print, spv, Context, Module, Options};
use std::path::Path;
use std::process::ExitCode;
use std::rc::Rc;
use tracing_subscriber::EnvFilter;

/// `+`-separated flags, e.g. `SPV_STRUCTURIZE_CONFIG=no-debug-names+keep-trailing-return`.
const CONFIG_ENV_VAR: &str = "SPV_STRUCTURIZE_CONFIG";

lazy_static! {
    static ref ENV_OPTIONS: Options = {
        let mut options = Options::default();
        let config = std::env::var(CONFIG_ENV_VAR).unwrap_or_default();
        for flag in config.split('+').map(str::trim).filter(|flag| !flag.is_empty()) {
            if !apply_flag(&mut options, flag) {
                tracing::warn!(flag, "ignoring unknown `{CONFIG_ENV_VAR}` flag");
            }
        }
        options
    };
}

/// Shared by `SPV_STRUCTURIZE_CONFIG` and the `--flag` arguments.
fn apply_flag(options: &mut Options, flag: &str) -> bool {
    match flag {
        "no-debug-names" => options.use_debug_names = false,
        "keep-trailing-return" => options.elide_trailing_return = false,
        _ => return false,
    }
    true
}

fn read_module(path: &Path) -> std::io::Result<Module> {
    let cx = Rc::new(Context::new());
    let bytes = std::fs::read(path)?;

    // Binary modules start with the magic number, in either endianness.
    let magic = spv::spec::Spec::get().magic;
    let is_binary = bytes.len() >= 4
        && [magic.to_le_bytes(), magic.to_be_bytes()].contains(&[bytes[0], bytes[1], bytes[2], bytes[3]]);
    if is_binary {
        Module::lower_from_spv_bytes(cx, &bytes)
    } else {
        let text = String::from_utf8(bytes)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Module::lower_from_spv_asm(cx, &text)
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut options = *ENV_OPTIONS;
    let mut args = vec![];
    for arg in std::env::args() {
        match arg.strip_prefix("--") {
            Some(flag) if apply_flag(&mut options, flag) => {}
            Some(_) => {
                eprintln!("error: unknown flag `{arg}`");
                return ExitCode::FAILURE;
            }
            None => args.push(arg),
        }
    }
    let (in_file, func_id) = match &args[..] {
        [_, in_file] => (in_file, None),
        [_, in_file, func_id] => {
            match func_id.trim_start_matches('%').parse::<spv::Id>() {
                Ok(id) => (in_file, Some(id)),
                Err(e) => {
                    eprintln!("error: invalid function ID `{func_id}`: {e}");
                    return ExitCode::FAILURE;
                }
            }
        }
        args => {
            let exe = args.first().map_or("spv-structurize", |exe| exe.as_str());
            eprintln!(
                "Usage: {exe} [--no-debug-names] [--keep-trailing-return] IN.{{spv,spvasm}} [FUNCTION_ID]"
            );
            return ExitCode::FAILURE;
        }
    };

    let module = match read_module(Path::new(in_file)) {
        Ok(module) => module,
        Err(e) => {
            eprintln!("error: failed to read `{in_file}`: {e}");
            return ExitCode::FAILURE;
        }
    };

    match func_id {
        Some(func_id) => match module.structurize_func(func_id, &options) {
            Ok(func) => {
                print!("{}", print::function_to_wgsl(&func));
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("error: {e}");
                ExitCode::FAILURE
            }
        },
        None => {
            let results = module.structurize_all(&options);
            print!("{}", print::module_to_wgsl(&results));
            if results.iter().all(|(_, result)| result.is_ok()) {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_turn_off_defaults() {
        let mut options = Options::default();
        assert!(apply_flag(&mut options, "no-debug-names"));
        assert!(!options.use_debug_names);
        assert!(options.elide_trailing_return);
        assert!(apply_flag(&mut options, "keep-trailing-return"));
        assert!(!options.elide_trailing_return);
        assert!(!apply_flag(&mut options, "verbose"));
    }
}
