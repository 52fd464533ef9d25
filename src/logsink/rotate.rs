use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Minimal size-rotating file writer: `<name>.log`, `<name>.log.1`, ...,
/// `<name>.log.<backup_count>`. No crate in the aligned dependency stack
/// provides this (the teacher doesn't do file rotation at all), so it's
/// hand-rolled in the same direct, no-abstraction style as the rest of
/// the pipeline's I/O.
pub struct RotatingWriter {
    path: PathBuf,
    max_bytes: u64,
    backup_count: usize,
    file: File,
}

impl RotatingWriter {
    pub fn open(dir: &Path, name: &str, max_size_mb: u64, backup_count: usize) -> std::io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{name}.log"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            max_bytes: max_size_mb * 1024 * 1024,
            backup_count,
            file,
        })
    }

    pub fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self.rotate_if_needed()?;
        writeln!(self.file, "{line}")
    }

    fn rotate_if_needed(&mut self) -> std::io::Result<()> {
        let size = self.file.metadata()?.len();
        if size < self.max_bytes {
            return Ok(());
        }

        for i in (1..self.backup_count).rev() {
            let src = self.backup_path(i);
            let dst = self.backup_path(i + 1);
            if src.exists() {
                let _ = fs::rename(src, dst);
            }
        }
        if self.backup_count > 0 {
            let _ = fs::rename(&self.path, self.backup_path(1));
        }

        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        Ok(())
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{index}"));
        PathBuf::from(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotates_when_size_exceeds_limit() {
        let dir = std::env::temp_dir().join(format!("logsink_test_{}", std::process::id()));
        let mut writer = RotatingWriter::open(&dir, "all", 0, 2).unwrap(); // max_bytes = 0 forces rotation
        writer.write_line("first line").unwrap();
        writer.write_line("second line").unwrap();
        assert!(dir.join("all.log.1").exists());
        let _ = fs::remove_dir_all(&dir);
    }
}
