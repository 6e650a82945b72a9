//! Small text and arithmetic helpers used across the bot.

/// "s" when a count isn't one.
pub fn plural(n: i64) -> &'static str {
    if n == 1 { "" } else { "s" }
}

/// Format a number of seconds the way the game announces times:
/// `N day(s), HH:MM:SS`.
pub fn duration(secs: i64) -> String {
    let days = secs / 86_400;
    let rem = secs.rem_euclid(86_400);
    format!(
        "{} day{}, {:02}:{:02}:{:02}",
        days,
        plural(days),
        rem / 3_600,
        rem % 3_600 / 60,
        rem % 60
    )
}

/// Greedy word wrap. Words longer than `width` are emitted on their own
/// line rather than split.
pub fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut cur = String::new();
    for word in text.split_whitespace() {
        if !cur.is_empty() && cur.len() + 1 + word.len() > width {
            lines.push(std::mem::take(&mut cur));
        }
        if !cur.is_empty() {
            cur.push(' ');
        }
        cur.push_str(word);
    }
    if !cur.is_empty() {
        lines.push(cur);
    }
    lines
}

/// Wrap a coordinate onto the toroidal map.
pub fn wrap_coord(v: i32, size: i32) -> i32 {
    v.rem_euclid(size)
}

/// Shortest signed step from `from` toward `to` on a wrapped axis.
pub fn wrapped_step(from: i32, to: i32, size: i32) -> i32 {
    let delta = (to - from).rem_euclid(size);
    if delta == 0 {
        0
    } else if delta <= size / 2 {
        1
    } else {
        -1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_formats() {
        assert_eq!(duration(0), "0 days, 00:00:00");
        assert_eq!(duration(90_061), "1 day, 01:01:01");
        assert_eq!(duration(2 * 86_400 + 3 * 3_600 + 4 * 60 + 5), "2 days, 03:04:05");
    }

    #[test]
    fn wrap_respects_width() {
        let lines = wrap("the quick brown fox jumps over the lazy dog", 15);
        assert!(lines.iter().all(|l| l.len() <= 15));
        assert_eq!(lines.join(" "), "the quick brown fox jumps over the lazy dog");
    }

    #[test]
    fn wrap_keeps_long_words_whole() {
        let lines = wrap("short supercalifragilistic end", 10);
        assert!(lines.contains(&"supercalifragilistic".to_string()));
    }

    #[test]
    fn wrapped_step_picks_short_way_around() {
        assert_eq!(wrapped_step(5, 5, 100), 0);
        assert_eq!(wrapped_step(5, 10, 100), 1);
        assert_eq!(wrapped_step(5, 95, 100), -1);
        assert_eq!(wrapped_step(95, 5, 100), 1);
    }
}
