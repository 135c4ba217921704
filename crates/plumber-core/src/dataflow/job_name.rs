//! Dataflow job-name normalisation
//!
//! Job names must match `^[a-z][a-z0-9-]*[a-z0-9]$` and be at most 63
//! characters long.

use rand::Rng;

/// Maximum job name length accepted by Dataflow
pub const MAX_JOB_NAME_LEN: usize = 63;

/// Turn free text into a valid job name.
///
/// Empty results get a random `job-<8 hex>` name. The output always
/// satisfies the grammar, so `sanitize(sanitize(x)) == sanitize(x)`.
pub fn sanitize(raw: &str) -> String {
    let mut name = String::with_capacity(raw.len());
    for c in raw.to_lowercase().chars() {
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
            c
        } else {
            '-'
        };
        if c == '-' && name.ends_with('-') {
            continue;
        }
        name.push(c);
    }

    let mut name = name.trim_matches('-').to_string();
    if name.is_empty() {
        return random_job_name();
    }

    // The grammar needs two characters, so a lone letter is prefixed too
    if !name.starts_with(|c: char| c.is_ascii_lowercase()) || name.len() == 1 {
        name.insert_str(0, "job-");
    }
    if name.ends_with(|c: char| !c.is_ascii_alphanumeric()) {
        name.pop();
    }

    name.truncate(MAX_JOB_NAME_LEN);
    // A cut at 63 can land right after a hyphen
    name.trim_end_matches('-').to_string()
}

fn random_job_name() -> String {
    format!("job-{:08x}", rand::thread_rng().r#gen::<u32>())
}
