use rand::Rng;

/// Build a blob key for a new submission.
///
/// Layout: `submissions/{user_id}/{problem_id}/{epoch_ms}-{rand}.{ext}`.
/// The timestamp plus random suffix keeps keys unique under concurrent
/// submissions from the same user to the same problem.
pub fn submission_key(user_id: &str, problem_id: &str, ext: &str) -> String {
    let ts = chrono::Utc::now().timestamp_millis();
    let rand_suffix: u32 = rand::rng().random();

    format!(
        "submissions/{}/{}/{}-{:08x}.{}",
        sanitize(user_id),
        sanitize(problem_id),
        ts,
        rand_suffix,
        ext
    )
}

/// Strip path-hostile characters from a key segment.
fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
