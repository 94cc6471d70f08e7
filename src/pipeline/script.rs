//! Shell commands injected into the build container.

use shell_escape::unix::escape;
use std::borrow::Cow;
use std::time::Duration;

fn quote(value: &str) -> Cow<'_, str> {
    escape(Cow::Borrowed(value))
}

/// Whole seconds, rounded up; not every `sleep` accepts fractions.
fn sleep_secs(duration: Duration) -> String {
    format!("sleep {}s", duration.as_millis().div_ceil(1000))
}

/// Wrap a command line for `sh -c`.
pub fn sh(command: String) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), command]
}

/// Wait for the uploaded payload, decode it, unpack it and run the script.
///
/// The payload is uploaded asynchronously, so the command first loops until
/// the file shows up and then gives the write `settle` to finish.
pub fn provision_command(
    payload_path: &str,
    dest: &str,
    script: &str,
    poll: Duration,
    settle: Duration,
) -> Vec<String> {
    let payload = quote(payload_path);
    let dest = quote(dest);
    let script = format!("./{}", script);

    sh(format!(
        "until [ -f {payload} ]; do {poll}; done; {settle}; \
         cat {payload} | base64 --decode > {dest} && tar -xvf {dest} && {script}",
        payload = payload,
        poll = sleep_secs(poll),
        settle = sleep_secs(settle),
        dest = dest,
        script = quote(&script),
    ))
}

/// Remove the uploaded payload and the decoded tarball.
///
/// `-f` keeps this harmless when the tarball was never decoded (dry-run).
pub fn cleanup_command(payload_path: &str, dest: &str) -> Vec<String> {
    sh(format!(
        "rm -f {}; rm -f {}",
        quote(payload_path),
        quote(dest)
    ))
}
