use anyhow::{Result, anyhow};
use event_counter::{AggregationKey, ReportRow, ReportWriter, read_report, write_report_file};
use std::fs;

fn row(date: &str, name: &str, count: u64) -> ReportRow {
    ReportRow::new(AggregationKey::parse(date, name).expect("valid test date"), count)
}

#[test]
fn rows_are_written_one_per_line() -> Result<()> {
    let mut writer = ReportWriter::new(Vec::new());
    writer.write_row(row("2018-01-30", "submission_success", 1))?;
    writer.write_row(row("2018-02-03", "registration_initiated", 1))?;
    assert_eq!(writer.rows(), 2);
    let out = String::from_utf8(writer.finish()?)?;
    assert_eq!(
        out,
        "2018-01-30 submission_success,1\n2018-02-03 registration_initiated,1\n"
    );
    Ok(())
}

#[test]
fn out_of_order_rows_are_refused() -> Result<()> {
    let mut writer = ReportWriter::new(Vec::new());
    writer.write_row(row("2018-01-02", "a", 1))?;
    assert!(writer.write_row(row("2018-01-01", "z", 1)).is_err());
    assert!(writer.write_row(row("2018-01-02", "a", 1)).is_err());
    Ok(())
}

#[test]
fn event_names_with_spaces_and_commas_read_back() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("report.txt");
    let rows = vec![
        row("2018-01-01", "page view", 3),
        row("2018-01-01", "save, then exit", 12),
    ];
    write_report_file(&path, rows.clone().into_iter().map(Ok))?;
    assert_eq!(read_report(&path)?, rows);
    Ok(())
}

#[test]
fn report_is_published_atomically() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("out").join("report.txt");
    let n = write_report_file(&path, vec![Ok(row("2018-01-01", "a", 1))])?;
    assert_eq!(n, 1);
    assert_eq!(fs::read_to_string(&path)?, "2018-01-01 a,1\n");
    // Only the report itself is left in the directory.
    assert_eq!(fs::read_dir(path.parent().unwrap())?.count(), 1);
    Ok(())
}

#[test]
fn failed_stream_leaves_previous_report_untouched() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("report.txt");
    fs::write(&path, "2017-01-01 old,1\n")?;

    let rows = vec![
        Ok(row("2018-01-01", "a", 1)),
        Err(anyhow!("segment went away")),
    ];
    assert!(write_report_file(&path, rows).is_err());
    assert_eq!(fs::read_to_string(&path)?, "2017-01-01 old,1\n");
    assert_eq!(fs::read_dir(tmp.path())?.count(), 1);
    Ok(())
}

#[test]
fn failed_first_report_leaves_no_file() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("report.txt");
    let rows = vec![Ok(row("2018-01-02", "a", 1)), Ok(row("2018-01-01", "a", 1))];
    assert!(write_report_file(&path, rows).is_err());
    assert!(!path.exists());
    Ok(())
}

#[test]
fn malformed_report_lines_are_errors() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("report.txt");
    fs::write(&path, "2018-01-01 a,1\n2018-01-01 b\n")?;
    assert!(read_report(&path).is_err());
    Ok(())
}
