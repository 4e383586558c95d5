use std::io::Write;

use pymc_glm::data::{Column, Table};
use pymc_glm::errors::DataError;

use tempfile::NamedTempFile;

fn write_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_literal_table_rejects_length_mismatch() {
    let result = Table::new()
        .with_ints("y", vec![1, 0, 1])
        .unwrap()
        .with_reals("x", vec![0.5, 1.5]);

    assert!(matches!(
        result,
        Err(DataError::LengthMismatch { expected: 3, found: 2, .. })
    ));
}

#[test]
fn test_duplicate_column_is_rejected() {
    let result = Table::new()
        .with_ints("y", vec![1])
        .unwrap()
        .with_ints("y", vec![0]);
    assert!(matches!(result, Err(DataError::DuplicateColumn(name)) if name == "y"));
}

#[test]
fn test_from_delimited_infers_column_kinds() {
    let file = write_file("year;temp;site\n2001;12.5;a\n2002;13;b\n2003;11.25;a\n");
    let table = Table::from_delimited(file.path(), b';').unwrap();

    assert_eq!(table.n_rows(), 3);
    assert_eq!(table.column_names(), &["year", "temp", "site"]);
    assert_eq!(table.column("year").unwrap(), &Column::Int(vec![2001, 2002, 2003]));
    assert_eq!(
        table.column("temp").unwrap(),
        &Column::Real(vec![12.5, 13.0, 11.25])
    );
    assert!(matches!(table.column("site").unwrap(), Column::Label(_)));
    assert!(matches!(table.reals("site"), Err(DataError::NotNumeric(_))));
}

#[test]
fn test_from_delimited_missing_file() {
    let result = Table::from_delimited("/nonexistent/temperatures.csv", b';');
    assert!(matches!(result, Err(DataError::Io { .. })));
}

#[test]
fn test_from_delimited_ragged_rows() {
    let file = write_file("year;temp\n2001;12.5\n2002\n");
    let result = Table::from_delimited(file.path(), b';');
    assert!(matches!(result, Err(DataError::Malformed { .. })));
}

#[test]
fn test_from_delimited_blank_header() {
    let file = write_file("year;;temp\n2001;1;12.5\n");
    let result = Table::from_delimited(file.path(), b';');
    assert!(matches!(result, Err(DataError::Malformed { .. })));
}

#[test]
fn test_select_by_position() {
    let table = Table::new()
        .with_ints("year", vec![2000, 2001])
        .unwrap()
        .with_reals("jan", vec![1.0, 2.0])
        .unwrap()
        .with_reals("feb", vec![3.0, 4.0])
        .unwrap();

    let picked = table.select_positions(&[0, 2]).unwrap();
    assert_eq!(picked.column_names(), &["year", "feb"]);

    assert!(matches!(
        table.select_positions(&[5]),
        Err(DataError::MissingPosition { position: 5, width: 3 })
    ));
    assert!(matches!(
        table.select(&["mar"]),
        Err(DataError::MissingColumn { .. })
    ));
}

#[test]
fn test_melt_three_columns() {
    let n = 4;
    let table = Table::new()
        .with_ints("year", (2000..2000 + n as i64).collect())
        .unwrap()
        .with_reals("jun", vec![15.0, 16.0, 17.0, 18.0])
        .unwrap()
        .with_reals("jul", vec![20.0, 21.0, 22.0, 23.0])
        .unwrap()
        .with_reals("aug", vec![19.0, 18.0, 17.0, 16.0])
        .unwrap();

    let long = table
        .melt(&["year"], &["jun", "jul", "aug"], "month", "temp")
        .unwrap();

    assert_eq!(long.n_rows(), 3 * n);
    assert_eq!(long.column_names(), &["year", "month", "temp"]);
    assert_eq!(
        long.keys("month").unwrap()[..4],
        ["jun", "jul", "aug", "jun"]
    );
    let temp = long.reals("temp").unwrap();
    assert_eq!(temp[0], 15.0);
    assert_eq!(temp[1], 20.0);
    assert_eq!(temp[2], 19.0);
    assert_eq!(long.reals("year").unwrap()[3], 2001.0);
}

#[test]
fn test_melt_without_id_columns_has_two_columns() {
    let table = Table::new()
        .with_reals("a", vec![1.0, 2.0])
        .unwrap()
        .with_reals("b", vec![3.0, 4.0])
        .unwrap();
    let long = table.melt(&[], &["a", "b"], "variable", "value").unwrap();
    assert_eq!(long.n_cols(), 2);
    assert_eq!(long.n_rows(), 4);
}
