//! End-to-end scenarios over the blocking reader surface.

use pretty_assertions::assert_eq;
use rowflow_core::{
    CollectSink, ColumnType, CsvOptions, CtorShape, Error, ErrorAction, FaultKind,
    FieldTypeInference, Materialize, MaterializeError, ParamShape, SlotType, TypeShape, Value,
};
use rowflow_core::value::FromValue;
use rowflow_csv::{CsvReaderBuilder, StrSource};

#[derive(Debug, PartialEq)]
struct Person {
    name: String,
    age: i32,
}

impl Materialize for Person {
    fn shape() -> TypeShape {
        TypeShape {
            name: "Person",
            constructors: vec![CtorShape {
                params: vec![
                    ParamShape::scalar("Name", SlotType::of(ColumnType::Str)),
                    ParamShape::scalar("Age", SlotType::of(ColumnType::I32)),
                ],
            }],
            members: Vec::new(),
            default_constructible: false,
        }
    }

    fn construct(_ctor: usize, args: Vec<Value>) -> Result<Self, MaterializeError> {
        let mut args = args.into_iter();
        Ok(Person {
            name: String::from_value(args.next().ok_or(MaterializeError::Arity)?)?,
            age: i32::from_value(args.next().ok_or(MaterializeError::Arity)?)?,
        })
    }
}

#[test]
fn missing_cell_becomes_zero_value() {
    let options = CsvOptions {
        has_header: true,
        error_action: ErrorAction::Skip,
        ..CsvOptions::default()
    };
    let sink = CollectSink::new();
    let reader = CsvReaderBuilder::new(options)
        .error_sink(sink.clone())
        .build(StrSource::new("Name,Age\nJohn,\nJane,25\n"));

    let mut people = reader.typed::<Person>();
    let collected: Vec<Person> = people.by_ref().map(|r| r.unwrap()).collect();
    assert_eq!(
        collected,
        vec![
            Person {
                name: "John".into(),
                age: 0
            },
            Person {
                name: "Jane".into(),
                age: 25
            },
        ]
    );
    assert_eq!(people.metrics().records_emitted, 2);
    assert_eq!(people.metrics().errors_reported, 0);
    assert!(sink.is_empty());
}

#[test]
fn column_limit_drops_the_wide_row_only() {
    let options = CsvOptions {
        has_header: true,
        max_columns_per_row: 3,
        error_action: ErrorAction::Skip,
        ..CsvOptions::default()
    };
    let sink = CollectSink::new();
    let reader = CsvReaderBuilder::new(options)
        .error_sink(sink.clone())
        .build(StrSource::new("A,B,C\n1,2,3\nx,y,z,w\n4,5,6\n"));

    let mut rows = reader.typed::<(i32, i32, i32)>();
    let collected: Vec<(i32, i32, i32)> = rows.by_ref().map(|r| r.unwrap()).collect();
    assert_eq!(collected, vec![(1, 2, 3), (4, 5, 6)]);

    let faults = sink.records();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].kind, FaultKind::LimitExceeded);
    assert_eq!(faults[0].record, 2);

    let metrics = rows.metrics();
    assert_eq!(metrics.raw_records_parsed, 3);
    assert_eq!(metrics.records_emitted, 2);
}

#[test]
fn smart_decimal_handles_comma_decimals_and_groupings() {
    let options = CsvOptions {
        separator: ";".into(),
        has_header: true,
        ..CsvOptions::default()
    };
    let reader = CsvReaderBuilder::new(options).build(StrSource::new(
        "Item;Price\nWidget;1234,56\nGadget;1.234,56\n",
    ));

    let records = reader
        .records()
        .collect::<rowflow_core::Result<Vec<_>>>()
        .unwrap();
    let expected = Value::Decimal("1234.56".parse().unwrap());
    assert_eq!(records[0].get("Price"), Some(&expected));
    assert_eq!(records[1].get("Price"), Some(&expected));
}

#[test]
fn crlf_straddling_chunks_counts_one_line() {
    let options = CsvOptions {
        has_header: true,
        field_type_inference: FieldTypeInference::None,
        ..CsvOptions::default()
    };
    // The CR lands at the end of the first 8-character chunk, the LF at
    // the start of the next.
    let reader = CsvReaderBuilder::new(options)
        .build(StrSource::with_chunk_size("Id,Text\r\n1,A\r\n", 8));

    let mut records = reader.records();
    let collected: Vec<_> = records.by_ref().map(|r| r.unwrap()).collect();
    assert_eq!(collected.len(), 1);
    assert_eq!(collected[0].get("Id"), Some(&Value::Str("1".into())));
    assert_eq!(collected[0].get("Text"), Some(&Value::Str("A".into())));
    assert_eq!(records.metrics().lines_read, 2);
}

#[test]
fn unterminated_quote_raises_after_flushing_good_records() {
    let options = CsvOptions {
        has_header: true,
        error_action: ErrorAction::Throw,
        ..CsvOptions::default()
    };
    let sink = CollectSink::new();
    let reader = CsvReaderBuilder::new(options)
        .error_sink(sink.clone())
        .build(StrSource::new("Col1\n\"Unfinished"));

    let mut records = reader.records();
    let first = records.next().unwrap();
    match first {
        Err(Error::Fault { kind, message, .. }) => {
            assert_eq!(kind, FaultKind::Quote);
            assert!(message.contains("unterminated"), "message: {message}");
        }
        other => panic!("expected a quote fault, got {other:?}"),
    }
    assert!(records.next().is_none());
    assert!(records.metrics().terminated_early);
    assert_eq!(records.metrics().records_emitted, 0);
    assert_eq!(sink.len(), 1);
}

#[derive(Debug, PartialEq)]
struct Member {
    first_name: String,
    birth_year: i32,
}

impl Materialize for Member {
    fn shape() -> TypeShape {
        TypeShape {
            name: "Member",
            constructors: vec![CtorShape {
                params: vec![
                    ParamShape::scalar("FirstName", SlotType::of(ColumnType::Str)),
                    ParamShape::scalar("BirthYear", SlotType::of(ColumnType::I32)),
                ],
            }],
            members: Vec::new(),
            default_constructible: false,
        }
    }

    fn construct(_ctor: usize, args: Vec<Value>) -> Result<Self, MaterializeError> {
        let mut args = args.into_iter();
        Ok(Member {
            first_name: String::from_value(args.next().ok_or(MaterializeError::Arity)?)?,
            birth_year: i32::from_value(args.next().ok_or(MaterializeError::Arity)?)?,
        })
    }
}

#[test]
fn snake_case_header_resolves_pascal_case_parameters() {
    let options = CsvOptions {
        has_header: true,
        ..CsvOptions::default()
    };
    let reader =
        CsvReaderBuilder::new(options).build(StrSource::new("first_name,birth_year\nCharlie,1990\n"));

    let members: Vec<Member> = reader.typed::<Member>().map(|r| r.unwrap()).collect();
    assert_eq!(
        members,
        vec![Member {
            first_name: "Charlie".into(),
            birth_year: 1990
        }]
    );
}
