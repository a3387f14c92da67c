//! PostgreSQL round-trip tests
//!
//! These tests run against a real PostgreSQL database.
//! They are marked #[ignore] by default and should be run explicitly:
//!
//!   SQLSHUTTLE_PG_PARAMS="host=localhost;user=postgres;password=postgres;dbname=postgres" \
//!     cargo test --test postgres_live -- --ignored

use sqlshuttle::db::postgres;
use sqlshuttle::{ConnParams, DbError, Table, Value};
use std::env;
use std::time::{SystemTime, UNIX_EPOCH};

fn test_params() -> ConnParams {
    let raw = env::var("SQLSHUTTLE_PG_PARAMS").unwrap_or_else(|_| {
        "host=localhost;port=5432;user=postgres;password=postgres;dbname=postgres".to_string()
    });
    ConnParams::from_pairs(raw.split(';').filter(|s| !s.is_empty()))
        .expect("Invalid SQLSHUTTLE_PG_PARAMS")
}

fn unique_table(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .subsec_nanos();
    format!("{}_{}", prefix, nanos)
}

struct DropTable<'a> {
    name: String,
    params: &'a ConnParams,
}

impl Drop for DropTable<'_> {
    fn drop(&mut self) {
        let _ = postgres::execute_sql(
            &format!("DROP TABLE IF EXISTS public.\"{}\"", self.name),
            self.params,
        );
    }
}

#[test]
#[ignore]
fn columns_follow_descriptor_order() {
    let params = test_params();
    let table = postgres::get_data("SELECT 1 AS b, 'x' AS a, NULL::int AS c", &params).unwrap();
    assert_eq!(table.columns(), &["b", "a", "c"]);
    assert_eq!(
        table.rows(),
        &[vec![Value::Int(1), Value::Text("x".into()), Value::Null]]
    );
}

#[test]
#[ignore]
fn zero_rows_is_an_empty_table_not_an_error() {
    let params = test_params();
    let table = postgres::get_data("SELECT 1 AS one WHERE false", &params).unwrap();
    assert_eq!(table.columns(), &["one"]);
    assert!(table.is_empty());
}

#[test]
#[ignore]
fn upload_then_read_round_trips_with_nulls() {
    let params = test_params();
    let name = unique_table("shuttle_rt");
    let _guard = DropTable {
        name: name.clone(),
        params: &params,
    };
    postgres::execute_sql(
        &format!(
            "CREATE TABLE public.\"{}\" (id int4, price numeric(10,2), label text, day date)",
            name
        ),
        &params,
    )
    .unwrap();

    let day = chrono::NaiveDate::from_ymd_opt(2021, 6, 17).unwrap();
    let data = Table::with_rows(
        vec!["id".into(), "price".into(), "label".into(), "day".into()],
        vec![
            vec![
                Value::Int(1),
                Value::Float(9.5),
                Value::Text("a".into()),
                Value::Date(day),
            ],
            vec![Value::Int(2), Value::Float(f64::NAN), Value::Null, Value::Null],
        ],
    )
    .unwrap();

    let report = postgres::upload_data(&name, &data, &params).unwrap();
    assert_eq!(report.rows_inserted, 2);

    let back = postgres::get_data(
        &format!("SELECT id, price, label, day FROM public.\"{}\" ORDER BY id", name),
        &params,
    )
    .unwrap();
    assert_eq!(
        back.rows(),
        &[
            vec![
                Value::Int(1),
                Value::Numeric("9.50".into()),
                Value::Text("a".into()),
                Value::Date(day)
            ],
            vec![Value::Int(2), Value::Null, Value::Null, Value::Null],
        ]
    );
}

#[test]
#[ignore]
fn column_count_mismatch_inserts_nothing() {
    let params = test_params();
    let name = unique_table("shuttle_mm");
    let _guard = DropTable {
        name: name.clone(),
        params: &params,
    };
    postgres::execute_sql(
        &format!("CREATE TABLE public.\"{}\" (a int, b int, c int)", name),
        &params,
    )
    .unwrap();

    let data = Table::with_rows(
        vec!["a".into(), "b".into()],
        vec![vec![Value::Int(1), Value::Int(2)]],
    )
    .unwrap();
    let err = postgres::upload_data(&name, &data, &params).unwrap_err();
    assert!(matches!(
        err,
        DbError::SchemaMismatch {
            expected: 3,
            found: 2,
            ..
        }
    ));

    let count = postgres::get_data(&format!("SELECT count(*) AS n FROM public.\"{}\"", name), &params)
        .unwrap();
    assert_eq!(count.rows()[0][0], Value::Int(0));
}

#[test]
#[ignore]
fn failed_row_rolls_back_whole_upload() {
    let params = test_params();
    let name = unique_table("shuttle_rb");
    let _guard = DropTable {
        name: name.clone(),
        params: &params,
    };
    postgres::execute_sql(
        &format!("CREATE TABLE public.\"{}\" (id int PRIMARY KEY)", name),
        &params,
    )
    .unwrap();

    let data = Table::with_rows(
        vec!["id".into()],
        vec![vec![Value::Int(1)], vec![Value::Int(1)]],
    )
    .unwrap();
    match postgres::upload_data(&name, &data, &params) {
        Err(DbError::Statement(message)) => {
            assert!(message.contains("duplicate key"), "{}", message);
            assert!(message.contains("23505"), "{}", message);
        }
        other => panic!("unexpected result: {:?}", other),
    }

    let count = postgres::get_data(&format!("SELECT count(*) AS n FROM public.\"{}\"", name), &params)
        .unwrap();
    assert_eq!(count.rows()[0][0], Value::Int(0));
}

#[test]
#[ignore]
fn execute_sql_prepends_header_row() {
    let params = test_params();
    let rows = postgres::execute_sql("SELECT 1 AS x UNION ALL SELECT 2", &params).unwrap();
    assert_eq!(
        rows,
        vec![
            vec![Value::Text("x".into())],
            vec![Value::Int(1)],
            vec![Value::Int(2)],
        ]
    );
}

#[test]
#[ignore]
fn statement_errors_carry_the_server_message() {
    let params = test_params();
    let err = postgres::get_data("SELECT * FROM no_such_table_xyz", &params).unwrap_err();
    match &err {
        DbError::Statement(message) => {
            assert!(message.contains("no_such_table_xyz"), "{}", message);
            assert!(message.contains("42P01"), "{}", message);
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
#[ignore]
fn uncommon_column_types_are_returned_as_text() {
    let params = test_params();
    let table = postgres::get_data(
        "SELECT 'a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11'::uuid AS id, \
                '10:30:00'::time AS at, \
                interval '1 day 02:00:00' AS span, \
                '\\xdead'::bytea AS blob, \
                ARRAY[1, NULL, 3]::int4[] AS nums, \
                ARRAY['a', 'b c']::text[] AS words, \
                '192.168.0.1'::inet AS addr",
        &params,
    )
    .unwrap();
    assert_eq!(
        table.rows()[0][..6],
        [
            Value::Text("a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11".into()),
            Value::Text("10:30:00".into()),
            Value::Text("1 day 02:00:00".into()),
            Value::Text("\\xdead".into()),
            Value::Text("{1,NULL,3}".into()),
            Value::Text("{a,\"b c\"}".into()),
        ]
    );
    assert!(matches!(table.rows()[0][6], Value::Text(_)));
}

#[test]
#[ignore]
fn multi_statement_sql_runs_as_one_batch() {
    let params = test_params();
    let name = unique_table("shuttle_batch");
    let _guard = DropTable {
        name: name.clone(),
        params: &params,
    };
    let rows = postgres::execute_sql(
        &format!(
            "CREATE TABLE public.\"{0}\" (id int); INSERT INTO public.\"{0}\" VALUES (1), (2);",
            name
        ),
        &params,
    )
    .unwrap();
    assert_eq!(rows, vec![Vec::<Value>::new()]);

    let count = postgres::get_data(&format!("SELECT count(*) AS n FROM public.\"{}\"", name), &params)
        .unwrap();
    assert_eq!(count.rows()[0][0], Value::Int(2));
}
