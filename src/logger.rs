use anyhow::Result;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

pub trait Logger: Send + Sync {
    fn session_open(&self, _peer: &str) {}
    fn login(&self, _user: &str) {}
    fn login_failed(&self, _user: &str) {}
    fn upload_closed(&self, _user: &str, _file_id: &str, _outcome: &str, _bytes: u64) {}
    fn error(&self, _context: &str, _msg: &str) {}
    fn session_close(&self, _user: Option<&str>) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

impl Logger for TextLogger {
    fn session_open(&self, peer: &str) {
        self.line(&format!("SESSION peer={}", peer));
    }
    fn login(&self, user: &str) {
        self.line(&format!("LOGIN user={}", user));
    }
    fn login_failed(&self, user: &str) {
        self.line(&format!("LOGIN-FAIL user={}", user));
    }
    fn upload_closed(&self, user: &str, file_id: &str, outcome: &str, bytes: u64) {
        self.line(&format!(
            "UPLOAD user={} file={} outcome={} bytes={}",
            user, file_id, outcome, bytes
        ));
    }
    fn error(&self, context: &str, msg: &str) {
        self.line(&format!("ERROR ctx={} msg={}", context, msg));
    }
    fn session_close(&self, user: Option<&str>) {
        self.line(&format!("CLOSE user={}", user.unwrap_or("-")));
    }
}
