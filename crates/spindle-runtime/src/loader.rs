use crate::error::RuntimeError;
use crate::script::Script;
use log::debug;
use std::fs;
use std::path::Path;

pub struct ScriptLoader;

impl ScriptLoader {
    pub fn load_file(path: &Path) -> Result<Script, RuntimeError> {
        let source = fs::read_to_string(path)?;
        let script = Script::parse(&source)?;
        debug!("Loaded {} commands from {}", script.len(), path.display());
        Ok(script)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_script_from_disk() {
        let path = std::env::temp_dir().join(format!("spindle-loader-{}.txt", std::process::id()));
        fs::write(&path, "spawn a low\ntick\n").unwrap();
        let script = ScriptLoader::load_file(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(script.len(), 2);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = ScriptLoader::load_file(Path::new("/nonexistent/spindle.txt")).unwrap_err();
        assert!(matches!(err, RuntimeError::Io(_)));
    }
}
