//! Similarity Scorer
//!
//! Pure string/set similarity used by the schema matcher. No I/O, no state.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Minimum length for a token to count as an abbreviation of a longer one.
const MIN_ABBREVIATION_LEN: usize = 3;

/// Trim, lowercase, and map `_` / `-` to spaces.
pub fn normalize(s: &str) -> String {
    s.trim().to_lowercase().replace(['_', '-'], " ")
}

pub fn tokenize(s: &str) -> Vec<String> {
    normalize(s)
        .split_whitespace()
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Jaccard over arbitrary element sets; two empty sets score 1.0.
pub fn set_jaccard<T: Eq + Hash>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let inter = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        inter as f64 / union as f64
    }
}

pub fn token_jaccard(a: &str, b: &str) -> f64 {
    let ta: HashSet<String> = tokenize(a).into_iter().collect();
    let tb: HashSet<String> = tokenize(b).into_iter().collect();
    set_jaccard(&ta, &tb)
}

/// Jaccard over element sets, e.g. two array cells.
pub fn array_similarity<T, I, J>(a: I, b: J) -> f64
where
    T: Eq + Hash,
    I: IntoIterator<Item = T>,
    J: IntoIterator<Item = T>,
{
    let sa: HashSet<T> = a.into_iter().collect();
    let sb: HashSet<T> = b.into_iter().collect();
    set_jaccard(&sa, &sb)
}

/// Character-level ratio `2*M / T` where M is the total size of the
/// longest matching blocks (found recursively left and right of each block).
///
/// The two inputs are ordered before matching so that the score does not
/// depend on argument order.
pub fn sequence_ratio(a: &str, b: &str) -> f64 {
    let na = normalize(a);
    let nb = normalize(b);
    let (first, second) = if na <= nb { (na, nb) } else { (nb, na) };

    let a_chars: Vec<char> = first.chars().collect();
    let b_chars: Vec<char> = second.chars().collect();
    let total = a_chars.len() + b_chars.len();
    if total == 0 {
        return 1.0;
    }

    let matched = matching_characters(&a_chars, &b_chars);
    2.0 * matched as f64 / total as f64
}

/// Hybrid column-name similarity: half token overlap, half character ratio.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let ta: HashSet<String> = tokenize(a).into_iter().collect();
    let tb: HashSet<String> = tokenize(b).into_iter().collect();
    let ea = expand_abbreviations(&ta, &tb);
    let eb = expand_abbreviations(&tb, &ta);

    0.5 * set_jaccard(&ea, &eb) + 0.5 * sequence_ratio(a, b)
}

/// Replace each token that abbreviates a token of `other` ("emp" for
/// "employee") by that longer token. Picks the smallest candidate so the
/// result is deterministic.
fn expand_abbreviations(tokens: &HashSet<String>, other: &HashSet<String>) -> HashSet<String> {
    tokens
        .iter()
        .map(|t| {
            if t.chars().count() < MIN_ABBREVIATION_LEN || other.contains(t) {
                return t.clone();
            }
            other
                .iter()
                .filter(|o| o.len() > t.len() && o.starts_with(t.as_str()))
                .min()
                .cloned()
                .unwrap_or_else(|| t.clone())
        })
        .collect()
}

fn matching_characters(a: &[char], b: &[char]) -> usize {
    let mut b2j: HashMap<char, Vec<usize>> = HashMap::new();
    for (j, c) in b.iter().enumerate() {
        b2j.entry(*c).or_default().push(j);
    }

    let mut matched = 0;
    let mut queue = vec![(0, a.len(), 0, b.len())];
    while let Some((alo, ahi, blo, bhi)) = queue.pop() {
        let (i, j, k) = longest_match(a, &b2j, alo, ahi, blo, bhi);
        if k == 0 {
            continue;
        }
        matched += k;
        if alo < i && blo < j {
            queue.push((alo, i, blo, j));
        }
        if i + k < ahi && j + k < bhi {
            queue.push((i + k, ahi, j + k, bhi));
        }
    }
    matched
}

/// Longest common block within `a[alo..ahi]` and `b[blo..bhi]`. Ties go to
/// the block that starts earliest in `a`, then earliest in `b`.
fn longest_match(
    a: &[char],
    b2j: &HashMap<char, Vec<usize>>,
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_size) = (alo, blo, 0);
    let mut j2len: HashMap<usize, usize> = HashMap::new();

    for (i, c) in a.iter().enumerate().take(ahi).skip(alo) {
        let mut new_j2len: HashMap<usize, usize> = HashMap::new();
        if let Some(positions) = b2j.get(c) {
            for &j in positions {
                if j < blo {
                    continue;
                }
                if j >= bhi {
                    break;
                }
                let k = j
                    .checked_sub(1)
                    .and_then(|prev| j2len.get(&prev))
                    .copied()
                    .unwrap_or(0)
                    + 1;
                new_j2len.insert(j, k);
                if k > best_size {
                    best_i = i + 1 - k;
                    best_j = j + 1 - k;
                    best_size = k;
                }
            }
        }
        j2len = new_j2len;
    }

    (best_i, best_j, best_size)
}
