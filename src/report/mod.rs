use std::io::Write;

use crate::core::{OutcomeSummary, Outlook, TrajectoryMatrix};

/// Plain-text summary of a run, ending with the growth recommendation.
pub fn render_report(label: &str, summary: &OutcomeSummary, outlook: &Outlook) -> String {
    let mut lines = vec![
        format!(
            "Mean final portfolio value: {}",
            format_currency(summary.mean)
        ),
        format!(
            "Median final portfolio value: {}",
            format_currency(summary.median)
        ),
        format!(
            "5th percentile final portfolio value: {}",
            format_currency(summary.p5)
        ),
        format!(
            "95th percentile final portfolio value: {}",
            format_currency(summary.p95)
        ),
    ];

    if outlook.expected_to_grow {
        lines.push(format!(
            "Based on the simulation, the investment in {label} is expected to grow."
        ));
    } else {
        lines.push(format!(
            "Based on the simulation, the investment in {label} is expected to decline."
        ));
    }

    if outlook.worst_case_grows {
        lines.push(
            "Even in the worst-case scenario (5th percentile), the investment is expected to grow."
                .to_string(),
        );
    } else {
        lines.push(
            "In the worst-case scenario (5th percentile), the investment may decline.".to_string(),
        );
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// `$1,234.56` style, two decimals, thousands separated.
pub fn format_currency(value: f64) -> String {
    if !value.is_finite() {
        return format!("${value}");
    }

    let fixed = format!("{:.2}", value.abs());
    let (whole, cents) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (idx, ch) in whole.chars().enumerate() {
        if idx > 0 && (whole.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if value < 0.0 && fixed != "0.00" { "-" } else { "" };
    format!("{sign}${grouped}.{cents}")
}

/// Writes one row per period and one column per trial, the layout a
/// charting tool needs to draw one line per trial.
pub fn write_trajectories_csv<W: Write>(
    matrix: &TrajectoryMatrix,
    writer: W,
) -> Result<(), csv::Error> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    let mut header = Vec::with_capacity(matrix.trials() + 1);
    header.push("period".to_string());
    header.extend((0..matrix.trials()).map(|trial| format!("trial_{trial}")));
    csv_writer.write_record(&header)?;

    for (period, row) in matrix.rows().enumerate() {
        let mut record = Vec::with_capacity(row.len() + 1);
        record.push(period.to_string());
        record.extend(row.iter().map(|value| value.to_string()));
        csv_writer.write_record(&record)?;
    }

    csv_writer.flush()?;
    Ok(())
}
