use std::cmp::Ordering;
use std::io::Write;

use screener_core::{CriterionId, ScoreResult, ScreenerError};

/// Sort for presentation: raw score desc, weighted score desc, symbol asc
pub fn rank_results(mut results: Vec<ScoreResult>) -> Vec<ScoreResult> {
    results.sort_by(|a, b| {
        b.raw_score
            .cmp(&a.raw_score)
            .then_with(|| {
                b.weighted_score
                    .partial_cmp(&a.weighted_score)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.security_id.cmp(&b.security_id))
    });
    results
}

/// Header row. Column positions are stable; criteria follow catalogue order.
pub fn export_columns() -> Vec<String> {
    let fixed = ["rank", "symbol", "name", "raw_score", "weighted_score", "computed_at"];
    let mut columns: Vec<String> = fixed.iter().map(|c| c.to_string()).collect();
    for id in CriterionId::ALL {
        columns.push(format!("{}_value", id.key()));
        columns.push(format!("{}_pass", id.key()));
    }
    columns
}

fn record(rank: usize, result: &ScoreResult) -> Vec<String> {
    let mut row = vec![
        rank.to_string(),
        result.security_id.clone(),
        result.name.clone().unwrap_or_default(),
        result.raw_score.to_string(),
        format!("{:.2}", result.weighted_score),
        result.computed_at.to_rfc3339(),
    ];
    for id in CriterionId::ALL {
        match result.criteria.iter().find(|c| c.id() == id) {
            Some(criterion) => {
                row.push(criterion.value().map(|v| format!("{:.4}", v)).unwrap_or_default());
                row.push(criterion.pass().to_string());
            }
            None => {
                row.push(String::new());
                row.push(String::new());
            }
        }
    }
    row
}

/// Write `results` in the given order, ranks starting at 1. Returns rows written.
pub fn write_csv<W: Write>(writer: W, results: &[ScoreResult]) -> Result<usize, ScreenerError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    let io_err = |e: csv::Error| ScreenerError::InvalidData(format!("CSV write failed: {}", e));

    csv_writer.write_record(export_columns()).map_err(io_err)?;
    for (i, result) in results.iter().enumerate() {
        csv_writer.write_record(record(i + 1, result)).map_err(io_err)?;
    }
    csv_writer
        .flush()
        .map_err(|e| ScreenerError::InvalidData(format!("CSV flush failed: {}", e)))?;

    Ok(results.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::score;
    use screener_core::Criterion;

    #[test]
    fn test_rank_order() {
        let ranked = rank_results(vec![
            score("MSFT", 7, 60.0),
            score("KO", 9, 80.0),
            score("AAPL", 7, 60.0),
            score("JNJ", 7, 72.5),
        ]);
        let order: Vec<&str> = ranked.iter().map(|r| r.security_id.as_str()).collect();
        assert_eq!(order, vec!["KO", "JNJ", "AAPL", "MSFT"]);
    }

    #[test]
    fn test_columns() {
        let columns = export_columns();
        assert_eq!(columns.len(), 6 + 2 * CriterionId::ALL.len());
        assert_eq!(&columns[..3], &["rank", "symbol", "name"]);
        assert_eq!(columns[6], format!("{}_value", CriterionId::ALL[0].key()));
        assert_eq!(columns[7], format!("{}_pass", CriterionId::ALL[0].key()));
    }

    #[test]
    fn test_write_csv() {
        let mut ko = score("KO", 1, 12.0);
        ko.criteria = vec![
            Criterion::new(CriterionId::PeRatio, true, Some(18.25), "< 20"),
            Criterion::new(CriterionId::Roic, false, None, ">= 15%"),
        ];
        let results = vec![ko, score("MMM", 0, 0.0)];

        let mut buf = Vec::new();
        assert_eq!(write_csv(&mut buf, &results).unwrap(), 2);

        let mut reader = csv::Reader::from_reader(buf.as_slice());
        let headers = reader.headers().unwrap().clone();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);

        let col = |name: &str| headers.iter().position(|h| h == name).unwrap();
        assert_eq!(&rows[0][col("rank")], "1");
        assert_eq!(&rows[0][col("symbol")], "KO");
        assert_eq!(&rows[0][col("name")], "KO Corp");
        assert_eq!(&rows[0][col("weighted_score")], "12.00");
        assert_eq!(&rows[0][col("pe_ratio_value")], "18.2500");
        assert_eq!(&rows[0][col("pe_ratio_pass")], "true");
        assert_eq!(&rows[0][col("roic_value")], "");
        assert_eq!(&rows[0][col("roic_pass")], "false");
        assert_eq!(&rows[1][col("rank")], "2");
        assert_eq!(&rows[1][col("pe_ratio_pass")], "");
    }
}
