mod common;

use common::*;
use p7dump::decoder::{FORMAT_FAILED, NO_FORMATTER};
use p7dump::event::format_date_time;
use p7dump::record::{ArgType, Subtype, FILE_HEADER_SIZE, FILE_MARKER};
use p7dump::{import, import_bytes, import_file, DumpSource, ImportError, ImportOptions, Level};

fn options() -> ImportOptions {
    ImportOptions::default()
}

#[test]
fn short_buffer_is_too_small() {
    for len in [0, 1, 8, FILE_HEADER_SIZE - 1] {
        let bytes = vec![0u8; len];
        let err = import_bytes(&bytes, &options()).unwrap_err();
        assert!(matches!(err, ImportError::TooSmall { len: l } if l == len as u64));
    }
}

#[test]
fn header_only_dump_has_no_events() {
    let bytes = DumpBuilder::new().build();
    assert_eq!(bytes.len(), FILE_HEADER_SIZE);
    let dump = import_bytes(&bytes, &options()).unwrap();
    assert!(dump.is_empty());
    assert_eq!(dump.host_name(), "build-host");
    assert_eq!(dump.process_name(), "demo.exe");
    assert_eq!(dump.header().process_id(), 1234);
    assert_eq!(
        format_date_time(&dump.process_start().unwrap()),
        "2021-03-04 05:06:07"
    );
}

#[test]
fn swapped_marker_is_distinct_from_bad_marker() {
    let bytes = DumpBuilder::with_marker(FILE_MARKER.swap_bytes()).build();
    assert!(matches!(
        import_bytes(&bytes, &options()),
        Err(ImportError::UnsupportedByteOrder)
    ));

    let bytes = DumpBuilder::with_marker(0xdead_beef).build();
    assert!(matches!(
        import_bytes(&bytes, &options()),
        Err(ImportError::BadMarker(0xdead_beef))
    ));
}

#[test]
fn oversized_dump_is_rejected() {
    let bytes = DumpBuilder::new().container(&prelude()).build();
    let options = ImportOptions {
        max_size: Some(FILE_HEADER_SIZE as u64),
        ..ImportOptions::default()
    };
    assert!(matches!(
        import_bytes(&bytes, &options),
        Err(ImportError::TooLarge { .. })
    ));
}

#[test]
fn resolves_reference_event() {
    let mut records = prelude();
    records.push(value_event(1, 3_500, 123));
    let bytes = DumpBuilder::new().container(&records).build();

    let dump = import_bytes(&bytes, &options()).unwrap();
    assert_eq!(dump.len(), 1);
    let event = &dump.events()[0];
    assert_eq!(event.module_name.as_deref(), Some("net"));
    assert_eq!(event.module_id, Some(7));
    assert_eq!(event.thread_name.as_deref(), Some("worker"));
    assert_eq!(event.file_name, "c.cpp");
    assert_eq!(event.file_path, "a/b/c.cpp");
    assert_eq!(event.function, "run");
    assert_eq!(event.line, 17);
    assert_eq!(event.message, "value=123");
    assert_eq!(event.level, Level::Info);
    assert_eq!(event.sequence, 1);

    assert_eq!(event.module_display(), "net(7)");
    assert_eq!(event.thread_display(), "worker(0x2a)");
    // 2.5 s after the calibration point
    assert_eq!(event.time_of_day(), "05:06:09.500");

    let module = dump.registry().module(7).unwrap();
    assert_eq!(module.verbosity, Level::Warning);
    let info = dump.stream_info().unwrap();
    assert_eq!(info.name(), "stream");
    assert_eq!(info.timer_frequency(), 1_000);
}

#[test]
fn unregistered_descriptor_yields_placeholder() {
    let mut records = prelude();
    records.push(data(99, 4, 1, 42, 1, 2_000, &[]));
    records.push(value_event(2, 2_000, 5));
    let bytes = DumpBuilder::new().container(&records).build();

    let dump = import_bytes(&bytes, &options()).unwrap();
    assert_eq!(dump.len(), 2);
    let missing = &dump.events()[0];
    assert!(missing.message.contains("99"));
    assert!(missing.file_name.is_empty());
    assert!(missing.function.is_empty());
    assert_eq!(missing.module_id, None);
    assert_eq!(missing.thread_name.as_deref(), Some("worker"));
    assert_eq!(dump.events()[1].message, "value=5");
}

#[test]
fn close_ignores_trailing_records() {
    let mut records = prelude();
    records.push(value_event(1, 1_000, 1));
    records.push(close());
    records.push(value_event(2, 1_000, 2));
    let bytes = DumpBuilder::new()
        .container(&records)
        .container(&[value_event(3, 1_000, 3)])
        .build();

    let dump = import_bytes(&bytes, &options()).unwrap();
    assert_eq!(dump.len(), 1);
    assert_eq!(dump.events()[0].message, "value=1");
    assert!(dump.stats().close_seen);
}

#[test]
fn truncated_tail_matches_prefix() {
    let mut first = prelude();
    first.push(value_event(1, 1_000, 1));
    let prefix = DumpBuilder::new().container(&first).build();
    let full = DumpBuilder::new()
        .container(&first)
        .container(&[value_event(2, 1_100, 2), value_event(3, 1_200, 3)])
        .build();

    let complete = import_bytes(&full, &options()).unwrap();
    assert_eq!(complete.len(), 3);

    let truncated = import_bytes(&full[..full.len() - 3], &options()).unwrap();
    let expected = import_bytes(&prefix, &options()).unwrap();
    assert_eq!(truncated.events(), expected.events());
    assert!(truncated.stats().trailing_bytes > 0);
}

#[test]
fn oversized_record_ends_only_its_container() {
    let mut module = module(8, 0, "cut");
    module.truncate(40);
    // Keep the declared 64 byte size while only 40 bytes are present
    let mut records = prelude();
    records.push(value_event(1, 1_000, 1));
    records.push(module);
    let bytes = DumpBuilder::new()
        .container(&records)
        .container(&[value_event(2, 1_000, 2)])
        .build();

    let dump = import_bytes(&bytes, &options()).unwrap();
    assert_eq!(dump.len(), 2);
    assert!(dump.registry().module(8).is_none());
    assert_eq!(dump.stats().truncated_chunks, 1);
}

#[test]
fn module_reregistration_applies_forward_only() {
    let mut records = prelude();
    records.push(value_event(1, 1_000, 1));
    records.push(module(7, 4, "net2"));
    records.push(value_event(2, 1_000, 2));
    let bytes = DumpBuilder::new().container(&records).build();

    let dump = import_bytes(&bytes, &options()).unwrap();
    let names: Vec<_> = dump
        .events()
        .iter()
        .map(|event| event.module_name.as_deref())
        .collect();
    assert_eq!(names, [Some("net"), Some("net2")]);
    assert_eq!(dump.registry().lookup_module(7), "net2");
}

#[test]
fn thread_reuse_takes_latest_name() {
    let mut records = prelude();
    records.push(value_event(1, 1_000, 1));
    records.push(thread(42, 2_000, "reused"));
    records.push(value_event(2, 2_000, 2));
    let bytes = DumpBuilder::new().container(&records).build();

    let dump = import_bytes(&bytes, &options()).unwrap();
    assert_eq!(dump.events()[0].thread_name.as_deref(), Some("worker"));
    assert_eq!(dump.events()[1].thread_name.as_deref(), Some("reused"));
}

#[test]
fn missing_argument_is_unable_to_format() {
    let mut records = prelude();
    records.push(desc(
        4,
        1,
        7,
        &[(ArgType::Int32, 4)],
        "%d and %d",
        "x.c",
        "f",
    ));
    records.push(data(4, 2, 0, 42, 1, 1_000, &1i32.to_le_bytes()));
    let bytes = DumpBuilder::new().container(&records).build();

    let dump = import_bytes(&bytes, &options()).unwrap();
    assert_eq!(dump.events()[0].message, FORMAT_FAILED);
}

#[test]
fn empty_template_has_no_formatter() {
    let mut records = prelude();
    records.push(desc(3, 1, 7, &[], "", "x.c", "f"));
    records.push(value_event(1, 1_000, 1));
    let bytes = DumpBuilder::new().container(&records).build();

    let dump = import_bytes(&bytes, &options()).unwrap();
    assert_eq!(dump.events()[0].message, NO_FORMATTER);
    assert_eq!(dump.events()[0].file_name, "x.c");
}

#[test]
fn string_arguments_and_line_breaks() {
    let mut args = Vec::new();
    str_arg(ArgType::Utf8Str, "disk\nfull", &mut args);
    str_arg(ArgType::Utf16Str, "C:", &mut args);
    args.extend(0x1000u64.to_le_bytes());

    let mut records = prelude();
    records.push(desc(
        5,
        9,
        7,
        &[
            (ArgType::Utf8Str, 0),
            (ArgType::Utf16Str, 0),
            (ArgType::Pointer, 8),
        ],
        "%s on %ls at %p",
        r"src\io\disk.cpp",
        "check",
    ));
    records.push(data(5, 4, 3, 42, 1, 1_000, &args));
    let bytes = DumpBuilder::new().container(&records).build();

    let dump = import_bytes(&bytes, &options()).unwrap();
    let event = &dump.events()[0];
    assert_eq!(event.message, "disk;full on C: at 0x1000");
    assert_eq!(event.file_name, "disk.cpp");
    assert_eq!(event.level, Level::Error);
    assert_eq!(event.processor, 3);
}

#[test]
fn non_bmp_template_keeps_following_fields() {
    let mut records = prelude();
    records.push(desc(
        6,
        1,
        7,
        &[],
        "smile \u{1F600}",
        "emoji.cpp",
        "grin",
    ));
    records.push(data(6, 2, 0, 42, 1, 1_000, &[]));
    let bytes = DumpBuilder::new().container(&records).build();

    let dump = import_bytes(&bytes, &options()).unwrap();
    let event = &dump.events()[0];
    assert_eq!(event.message, "smile \u{1F600}");
    assert_eq!(event.file_name, "emoji.cpp");
    assert_eq!(event.function, "grin");
}

#[test]
fn events_before_calibration_have_no_time() {
    let records = vec![
        desc(3, 1, 7, &[(ArgType::Int32, 4)], "v=%d", "x.c", "f"),
        value_event(1, 5_000, 1),
    ];
    let bytes = DumpBuilder::new().container(&records).build();

    let dump = import_bytes(&bytes, &options()).unwrap();
    let event = &dump.events()[0];
    assert_eq!(event.ticks, 0);
    assert!(event.time().is_none());
    assert_eq!(event.time_of_day(), "");
    assert_eq!(event.module_display(), "7");
    assert_eq!(event.thread_display(), "0x2a");
}

#[test]
fn unknown_level_and_channel_pass_through() {
    let mut records = prelude();
    records.push(data(3, 9, 0, 42, 1, 1_000, &7i32.to_le_bytes()));
    let bytes = DumpBuilder::new()
        .raw(&container(5, &records))
        .build();

    let dump = import_bytes(&bytes, &options()).unwrap();
    let event = &dump.events()[0];
    assert_eq!(event.level, Level::Unknown(9));
    assert_eq!(event.level.label(), "");
    assert_eq!(event.message, "value=7");
    assert_eq!(dump.stats().records.get(&Subtype::Data), Some(&1));
}

#[test]
fn events_keep_arrival_order() {
    let mut records = prelude();
    for (sequence, timer) in [(3, 3_000), (1, 1_000), (2, 2_000)] {
        records.push(value_event(sequence, timer, sequence as i32));
    }
    let bytes = DumpBuilder::new().container(&records).build();

    let dump = import_bytes(&bytes, &options()).unwrap();
    let sequences: Vec<_> = dump.events().iter().map(|event| event.sequence).collect();
    assert_eq!(sequences, [3, 1, 2]);
    let numbers: Vec<_> = dump.events().iter().map(|event| event.number()).collect();
    assert_eq!(numbers, [1, 2, 3]);
    assert_eq!(dump.level_counts().get(&Level::Info), Some(&3));
}

#[test]
fn oversized_width_and_precision_are_truncated() {
    let mut star = Vec::new();
    star.extend(i64::MIN.to_le_bytes());
    star.extend(9i32.to_le_bytes());

    let mut records = prelude();
    records.push(desc(
        5,
        1,
        7,
        &[(ArgType::Int32, 4)],
        "%99999999999999999999999d",
        "w.cpp",
        "wide",
    ));
    records.push(desc(
        6,
        1,
        7,
        &[(ArgType::Int32, 4)],
        "%.99999999999999999999999d",
        "p.cpp",
        "precise",
    ));
    records.push(desc(
        8,
        1,
        7,
        &[(ArgType::Int64, 8), (ArgType::Int32, 4)],
        "%*d",
        "s.cpp",
        "star",
    ));
    records.push(data(5, 2, 0, 42, 1, 1_000, &9i32.to_le_bytes()));
    records.push(data(6, 2, 0, 42, 2, 1_000, &9i32.to_le_bytes()));
    records.push(data(8, 2, 0, 42, 3, 1_000, &star));
    let bytes = DumpBuilder::new().container(&records).build();

    let options = ImportOptions {
        message_capacity: 16,
        ..ImportOptions::default()
    };
    let dump = import_bytes(&bytes, &options).unwrap();
    let messages: Vec<_> = dump.events().iter().map(|event| event.message.as_str()).collect();
    assert_eq!(
        messages,
        [
            "               9",
            "0000000000000009",
            "9               ",
        ]
    );
}

#[test]
fn file_and_memory_sources_agree() {
    let mut records = prelude();
    records.push(value_event(1, 1_500, 77));
    let bytes = DumpBuilder::new().container(&records).build();

    let path = std::env::temp_dir().join(format!("p7dump-import-{}.p7d", std::process::id()));
    std::fs::write(&path, &bytes).unwrap();
    let from_file = import(DumpSource::Path(&path), &options());
    std::fs::remove_file(&path).unwrap();

    let from_file = from_file.unwrap();
    let from_memory = import(DumpSource::Bytes(&bytes), &options()).unwrap();
    assert_eq!(from_file.events(), from_memory.events());
    assert_eq!(from_file.events()[0].message, "value=77");
}

#[test]
fn missing_file_is_io_error() {
    let path = std::env::temp_dir().join("p7dump-does-not-exist.p7d");
    assert!(matches!(
        import_file(&path, &options()),
        Err(ImportError::Io(_))
    ));
}
