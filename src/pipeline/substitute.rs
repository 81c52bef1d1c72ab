//! Order-preserving asynchronous text substitution.
//!
//! Replacing regex matches with the results of async transforms is the one
//! generic utility every preprocessing pass shares. The transforms run
//! concurrently — a page full of formulas renders in parallel — but the
//! rewritten text must read as if they ran left to right. The approach:
//! collect all matches in one linear scan, launch every transform at once,
//! await them as an ordered join, then splice results back in match order.
//!
//! Transform errors propagate and abort the whole pass. Callers that must
//! survive partial failure trap errors inside the transform and return
//! fallback text instead — exactly what the markup preprocessor does.

use regex::{Captures, Regex};
use std::future::Future;

/// Replace every match of `pattern` in `text` with the result of the async
/// `transform`, preserving left-to-right match order regardless of the
/// order in which the transforms complete.
pub async fn replace_all_async<'t, F, Fut, E>(
    text: &'t str,
    pattern: &Regex,
    transform: F,
) -> Result<String, E>
where
    F: Fn(&Captures<'t>) -> Fut,
    Fut: Future<Output = Result<String, E>>,
{
    let matches: Vec<Captures<'t>> = pattern.captures_iter(text).collect();
    if matches.is_empty() {
        return Ok(text.to_string());
    }

    let replacements =
        futures::future::try_join_all(matches.iter().map(|caps| transform(caps))).await?;

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (caps, replacement) in matches.iter().zip(replacements) {
        let m = caps
            .get(0)
            .expect("capture group 0 always exists for a match");
        out.push_str(&text[last..m.start()]);
        out.push_str(&replacement);
        last = m.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{sleep, Duration};

    static DOLLARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\$(\d+)\$\$").unwrap());

    #[tokio::test]
    async fn no_matches_returns_input() {
        let out: Result<String, Infallible> =
            replace_all_async("plain text", &DOLLARS, |_| async { Ok("x".to_string()) }).await;
        assert_eq!(out.unwrap(), "plain text");
    }

    #[tokio::test]
    async fn order_preserved_under_reversed_completion() {
        // The first match sleeps longest, so transforms complete in reverse
        // call order; output must still follow original match order.
        let calls = AtomicUsize::new(0);
        let out: Result<String, Infallible> =
            replace_all_async("A $$1$$ B $$2$$ C", &DOLLARS, |caps| {
                let n: u64 = caps[1].parse().unwrap();
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    sleep(Duration::from_millis(60 / n)).await;
                    Ok(format!("[{n}]"))
                }
            })
            .await;
        assert_eq!(out.unwrap(), "A [1] B [2] C");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn adjacent_and_edge_matches() {
        let out: Result<String, Infallible> =
            replace_all_async("$$1$$$$2$$", &DOLLARS, |caps| {
                let n = caps[1].to_string();
                async move { Ok(format!("<{n}>")) }
            })
            .await;
        assert_eq!(out.unwrap(), "<1><2>");
    }

    #[tokio::test]
    async fn transform_error_propagates() {
        let out: Result<String, &'static str> =
            replace_all_async("x $$1$$ y", &DOLLARS, |_| async { Err("boom") }).await;
        assert_eq!(out.unwrap_err(), "boom");
    }
}
