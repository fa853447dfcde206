//! User-facing side effects of the login flow
//!
//! Opening a browser window and reading a pasted code are host-level effects,
//! so the flow only reaches them through these traits. Tests substitute
//! scripted implementations.

use std::io::{BufRead, Write};

/// Opens the authorization URL for the user.
///
/// Launching is fire-and-forget: an `Ok` only means the launch did not fail
/// immediately.
pub trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &str) -> std::io::Result<()>;
}

/// Launches the platform's default browser.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> std::io::Result<()> {
        open::that_detached(url)
    }
}

/// Asks the user for the authorization code shown by the server.
///
/// Called from a blocking thread; implementations may block indefinitely.
pub trait CodePrompt: Send + Sync {
    fn read_code(&self, authorization_url: &str) -> std::io::Result<String>;
}

/// Prompts on stderr and reads one line from stdin.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinPrompt;

impl CodePrompt for StdinPrompt {
    fn read_code(&self, authorization_url: &str) -> std::io::Result<String> {
        let mut stderr = std::io::stderr().lock();
        writeln!(
            stderr,
            "If your browser did not open, visit:\n\n    {authorization_url}\n"
        )?;
        write!(stderr, "Enter the code shown in your browser: ")?;
        stderr.flush()?;

        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedCode(&'static str);

    impl CodePrompt for FixedCode {
        fn read_code(&self, _authorization_url: &str) -> std::io::Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn prompts_are_object_safe() {
        let prompt: Box<dyn CodePrompt> = Box::new(FixedCode("abc"));
        assert_eq!(prompt.read_code("https://x").unwrap(), "abc");

        let _browser: Box<dyn BrowserLauncher> = Box::new(SystemBrowser);
    }
}
