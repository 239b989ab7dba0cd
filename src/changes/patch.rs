use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("Invalid patch: {0}")]
    Parse(String),

    #[error("Hunk {hunk} (@@ -{old_start}) does not match the file")]
    Mismatch { hunk: usize, old_start: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Hunk {
    old_start: usize,
    old_count: usize,
    /// Context and removed lines, in file order
    before: Vec<String>,
    /// Context and added lines, in file order
    after: Vec<String>,
}

/// Apply a unified diff for a single file to `original`.
///
/// File headers (`diff --git`, `---`, `+++`, `index`) are skipped. Hunk
/// line counts are not trusted; each hunk is located by its old-side lines,
/// preferring the position closest to the header's start line, with a
/// trailing-whitespace-insensitive pass when no exact match exists.
pub fn apply_patch(original: &str, patch: &str) -> Result<String, PatchError> {
    let hunks = parse_hunks(patch)?;
    if hunks.is_empty() {
        return Err(PatchError::Parse("patch contains no hunks".to_string()));
    }

    let lines: Vec<&str> = original.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut cursor = 0usize;
    // Net line shift introduced by the hunks applied so far
    let mut offset: isize = 0;

    for (idx, hunk) in hunks.iter().enumerate() {
        let expected = expected_position(hunk, offset).max(cursor);
        let at = locate(&lines, &hunk.before, cursor, expected).ok_or(PatchError::Mismatch {
            hunk: idx + 1,
            old_start: hunk.old_start,
        })?;
        out.extend(lines[cursor..at].iter().map(|l| l.to_string()));
        out.extend(hunk.after.iter().cloned());
        cursor = at + hunk.before.len();
        offset += hunk.after.len() as isize - hunk.before.len() as isize;
    }
    out.extend(lines[cursor..].iter().map(|l| l.to_string()));

    let mut result = out.join("\n");
    if !result.is_empty() && (original.ends_with('\n') || original.is_empty()) {
        result.push('\n');
    }
    Ok(result)
}

fn expected_position(hunk: &Hunk, offset: isize) -> usize {
    // A pure insertion's start line is the line it follows
    let base = if hunk.old_count == 0 || hunk.before.is_empty() {
        hunk.old_start
    } else {
        hunk.old_start.saturating_sub(1)
    };
    (base as isize + offset).max(0) as usize
}

/// Index at or after `from` where `block` matches, closest to `expected`.
fn locate(lines: &[&str], block: &[String], from: usize, expected: usize) -> Option<usize> {
    if block.is_empty() {
        return Some(expected.min(lines.len()));
    }
    if block.len() > lines.len() {
        return None;
    }
    let last = lines.len() - block.len();
    if from > last {
        return None;
    }
    let exact = |at: usize| block.iter().enumerate().all(|(k, l)| lines[at + k] == l);
    let loose = |at: usize| {
        block
            .iter()
            .enumerate()
            .all(|(k, l)| lines[at + k].trim_end() == l.trim_end())
    };
    closest(from..=last, expected, exact).or_else(|| closest(from..=last, expected, loose))
}

fn closest(
    range: std::ops::RangeInclusive<usize>,
    expected: usize,
    matches: impl Fn(usize) -> bool,
) -> Option<usize> {
    range
        .filter(|&at| matches(at))
        .min_by_key(|&at| at.abs_diff(expected))
}

fn parse_hunks(patch: &str) -> Result<Vec<Hunk>, PatchError> {
    let mut hunks = Vec::new();
    let mut current: Option<Hunk> = None;

    for line in patch.lines() {
        if line.starts_with("@@") {
            hunks.extend(current.take());
            let (old_start, old_count, _, _) = parse_hunk_header(line)?;
            current = Some(Hunk {
                old_start,
                old_count,
                before: Vec::new(),
                after: Vec::new(),
            });
            continue;
        }
        if line.starts_with("diff --git ") {
            hunks.extend(current.take());
            continue;
        }
        let Some(hunk) = current.as_mut() else {
            // File headers before the first hunk
            continue;
        };
        if line.starts_with('\\') {
            // "\ No newline at end of file"
            continue;
        }
        if let Some(removed) = line.strip_prefix('-') {
            hunk.before.push(removed.to_string());
        } else if let Some(added) = line.strip_prefix('+') {
            hunk.after.push(added.to_string());
        } else {
            // Context; generators often drop the leading space on blank lines
            let context = line.strip_prefix(' ').unwrap_or(line);
            hunk.before.push(context.to_string());
            hunk.after.push(context.to_string());
        }
    }
    hunks.extend(current);

    for hunk in &mut hunks {
        trim_trailing_blank_context(hunk);
    }
    Ok(hunks)
}

/// A blank line after the last hunk line is an artifact of how the patch was
/// quoted, not context.
fn trim_trailing_blank_context(hunk: &mut Hunk) {
    while hunk.before.last().is_some_and(|l| l.is_empty())
        && hunk.after.last().is_some_and(|l| l.is_empty())
        && hunk.before.len() > hunk.old_count
    {
        hunk.before.pop();
        hunk.after.pop();
    }
}

fn parse_hunk_header(line: &str) -> Result<(usize, usize, usize, usize), PatchError> {
    let header = line
        .trim()
        .strip_prefix("@@")
        .ok_or_else(|| PatchError::Parse("Invalid hunk header".to_string()))?;
    let header = match header.find("@@") {
        Some(end) => &header[..end],
        None => header,
    };
    let mut parts = header.split_whitespace();
    let old_part = parts
        .next()
        .ok_or_else(|| PatchError::Parse("Missing old range".to_string()))?;
    let new_part = parts
        .next()
        .ok_or_else(|| PatchError::Parse("Missing new range".to_string()))?;

    let (old_start, old_count) = parse_range(old_part, '-')?;
    let (new_start, new_count) = parse_range(new_part, '+')?;

    Ok((old_start, old_count, new_start, new_count))
}

fn parse_range(part: &str, prefix: char) -> Result<(usize, usize), PatchError> {
    let range = part
        .strip_prefix(prefix)
        .ok_or_else(|| PatchError::Parse("Invalid range prefix".to_string()))?;
    let (start_str, count_str) = match range.split_once(',') {
        Some((start, count)) => (start, count),
        None => (range, "1"),
    };
    let start = start_str
        .parse::<usize>()
        .map_err(|_| PatchError::Parse(format!("Invalid range start in {}", part)))?;
    let count = count_str
        .parse::<usize>()
        .map_err(|_| PatchError::Parse(format!("Invalid range count in {}", part)))?;
    Ok((start, count))
}
