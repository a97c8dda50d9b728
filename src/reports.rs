use log::info;
use std::borrow::Cow;
use std::fmt::Write as _;

use crate::classify::ClassificationStats;
use crate::taxonomy::{TaxonomyNode, UNKNOWN};

pub const LEVEL_SEPARATOR: char = ';';

/// `query<TAB>name<TAB>rank<TAB>level1;level2;...` followed by a newline.
pub fn format_lca_line(query: &str, node: &TaxonomyNode, levels: &[Cow<'_, str>]) -> String {
    let mut line = String::with_capacity(query.len() + node.name.len() + 64);
    let _ = write!(line, "{}\t{}\t{}\t", query, node.name, node.rank);
    push_joined(&mut line, levels.iter().map(|l| l.as_ref()));
    line.push('\n');
    line
}

/// Row for a query none of whose hits resolved to a taxon. Every requested
/// level reads `unknown`; with no levels requested the field is a single
/// `unknown`.
pub fn format_unknown_line(query: &str, num_levels: usize) -> String {
    let mut line = format!("{}\t{}\t{}\t", query, UNKNOWN, UNKNOWN);
    push_joined(&mut line, std::iter::repeat(UNKNOWN).take(num_levels.max(1)));
    line.push('\n');
    line
}

fn push_joined<'a, I: Iterator<Item = &'a str>>(line: &mut String, parts: I) {
    for (i, part) in parts.enumerate() {
        if i > 0 {
            line.push(LEVEL_SEPARATOR);
        }
        line.push_str(part);
    }
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}

pub fn report_stats(duration_secs: f64, stats: &ClassificationStats) {
    let rate = if duration_secs > 0.0 {
        stats.total_queries as f64 / duration_secs
    } else {
        0.0
    };
    info!(
        "{} sequences analyzed in {:.3} seconds ({} sequences per second)",
        stats.total_queries, duration_secs, rate as u64
    );
    info!(
        "  {} sequences assigned to a taxon ({:.2}%)",
        stats.total_classified,
        percent(stats.total_classified, stats.total_queries)
    );
    info!(
        "  {} sequences unknown ({:.2}%)",
        stats.total_unknown(),
        percent(stats.total_unknown(), stats.total_queries)
    );
    info!(
        "  {} hits kept, {} could not be mapped to a taxid",
        stats.total_hits, stats.unresolved_hits
    );
    if stats.dropped_lines > 0 {
        info!("  {} alignment lines ignored", stats.dropped_lines);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, rank: &str) -> TaxonomyNode {
        TaxonomyNode {
            id: 7,
            taxid: 207599,
            parent_id: 6,
            children: vec![],
            rank: rank.to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_format_lca_line() {
        let levels = vec![Cow::Borrowed("Hominidae"), Cow::Owned("uc_Hominini".to_string())];
        assert_eq!(
            format_lca_line("read1", &node("Hominini", "tribe"), &levels),
            "read1\tHominini\ttribe\tHominidae;uc_Hominini\n"
        );
        assert_eq!(
            format_lca_line("read2", &node("Homo", "genus"), &[]),
            "read2\tHomo\tgenus\t\n"
        );
    }

    #[test]
    fn test_format_unknown_line() {
        assert_eq!(
            format_unknown_line("q", 3),
            "q\tunknown\tunknown\tunknown;unknown;unknown\n"
        );
        assert_eq!(format_unknown_line("q", 0), "q\tunknown\tunknown\tunknown\n");
    }

    #[test]
    fn test_percent_of_nothing() {
        assert_eq!(percent(0, 0), 0.0);
        assert_eq!(percent(1, 4), 25.0);
    }
}
