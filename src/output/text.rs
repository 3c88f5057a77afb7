//! Plain sentence result.

use super::ScanReport;

pub fn render(report: &ScanReport) -> String {
    format!(
        "The character '{}' appears {} times in file {}.\n",
        report.target,
        report.occurrences,
        report.input.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_render_sentence() {
        let report = ScanReport::new(Path::new("in.txt"), b'a', 4, 2, 0);
        assert_eq!(
            render(&report),
            "The character 'a' appears 4 times in file in.txt.\n"
        );
    }

    #[test]
    fn test_render_zero() {
        let report = ScanReport::new(Path::new("data/empty-ish.bin"), b'z', 0, 8, 0);
        assert_eq!(
            render(&report),
            "The character 'z' appears 0 times in file data/empty-ish.bin.\n"
        );
    }
}
