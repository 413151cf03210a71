// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Fixed-schema columnar tables.
//!
//! Four tables make up the claim graph: entities, claims, provenance and
//! spans. Rows are sorted by their primary key and written as a single
//! record batch with ZSTD at a fixed level and a fixed `created_by`, so
//! identical rows always produce identical file bytes. That byte stability
//! is a precondition for content addressing, not an optimization.
//!
//! The reader enforces the declared schema: column names in order, physical
//! types, and zero nulls in any column.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow_array::{Array, ArrayRef, Int64Array, Int8Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;

use crate::error::{CoreError, CoreResult, ErrorCode, VerifyIssue};

pub const OBJECT_TYPE_ENTITY: &str = "entity";
pub const OBJECT_TYPE_LITERAL_STRING: &str = "literal:string";
pub const VALID_OBJECT_TYPES: [&str; 2] = [OBJECT_TYPE_ENTITY, OBJECT_TYPE_LITERAL_STRING];

/// Accepted extraction tiers, fixed at build time.
pub const VALID_TIERS: std::ops::RangeInclusive<i8> = 0..=3;

const WRITER_CREATED_BY: &str = "axm-core columnar writer";
const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRow {
    pub entity_id: String,
    pub namespace: String,
    pub label: String,
    pub entity_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRow {
    pub claim_id: String,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub object_type: String,
    pub tier: i8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvenanceRow {
    pub provenance_id: String,
    pub claim_id: String,
    pub source_hash: String,
    pub byte_start: i64,
    pub byte_end: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanRow {
    pub span_id: String,
    pub source_hash: String,
    pub byte_start: i64,
    pub byte_end: i64,
    pub text: String,
}

fn utf8(name: &str) -> Field {
    Field::new(name, DataType::Utf8, false)
}

pub fn entities_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        utf8("entity_id"),
        utf8("namespace"),
        utf8("label"),
        utf8("entity_type"),
    ]))
}

pub fn claims_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        utf8("claim_id"),
        utf8("subject"),
        utf8("predicate"),
        utf8("object"),
        utf8("object_type"),
        Field::new("tier", DataType::Int8, false),
    ]))
}

pub fn provenance_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        utf8("provenance_id"),
        utf8("claim_id"),
        utf8("source_hash"),
        Field::new("byte_start", DataType::Int64, false),
        Field::new("byte_end", DataType::Int64, false),
    ]))
}

pub fn spans_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        utf8("span_id"),
        utf8("source_hash"),
        Field::new("byte_start", DataType::Int64, false),
        Field::new("byte_end", DataType::Int64, false),
        utf8("text"),
    ]))
}

fn columnar(e: impl std::fmt::Display) -> CoreError {
    CoreError::Columnar(e.to_string())
}

fn writer_properties() -> CoreResult<WriterProperties> {
    let level = ZstdLevel::try_new(ZSTD_LEVEL).map_err(columnar)?;
    Ok(WriterProperties::builder()
        .set_compression(Compression::ZSTD(level))
        .set_created_by(WRITER_CREATED_BY.to_string())
        .build())
}

fn write_batch(path: &Path, schema: SchemaRef, columns: Vec<ArrayRef>) -> CoreResult<()> {
    let batch = RecordBatch::try_new(schema.clone(), columns).map_err(columnar)?;
    let file = File::create(path).map_err(|e| CoreError::io(path, e))?;
    let mut writer = ArrowWriter::try_new(file, schema, Some(writer_properties()?)).map_err(columnar)?;
    writer.write(&batch).map_err(columnar)?;
    writer.close().map_err(columnar)?;
    Ok(())
}

fn utf8_array<'a>(values: impl Iterator<Item = &'a str>) -> ArrayRef {
    Arc::new(StringArray::from_iter_values(values))
}

pub fn write_entities(path: &Path, rows: &mut [EntityRow]) -> CoreResult<()> {
    rows.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
    write_batch(
        path,
        entities_schema(),
        vec![
            utf8_array(rows.iter().map(|r| r.entity_id.as_str())),
            utf8_array(rows.iter().map(|r| r.namespace.as_str())),
            utf8_array(rows.iter().map(|r| r.label.as_str())),
            utf8_array(rows.iter().map(|r| r.entity_type.as_str())),
        ],
    )
}

pub fn write_claims(path: &Path, rows: &mut [ClaimRow]) -> CoreResult<()> {
    rows.sort_by(|a, b| a.claim_id.cmp(&b.claim_id));
    write_batch(
        path,
        claims_schema(),
        vec![
            utf8_array(rows.iter().map(|r| r.claim_id.as_str())),
            utf8_array(rows.iter().map(|r| r.subject.as_str())),
            utf8_array(rows.iter().map(|r| r.predicate.as_str())),
            utf8_array(rows.iter().map(|r| r.object.as_str())),
            utf8_array(rows.iter().map(|r| r.object_type.as_str())),
            Arc::new(Int8Array::from_iter_values(rows.iter().map(|r| r.tier))),
        ],
    )
}

pub fn write_provenance(path: &Path, rows: &mut [ProvenanceRow]) -> CoreResult<()> {
    rows.sort_by(|a, b| {
        (a.provenance_id.as_str(), a.claim_id.as_str())
            .cmp(&(b.provenance_id.as_str(), b.claim_id.as_str()))
    });
    write_batch(
        path,
        provenance_schema(),
        vec![
            utf8_array(rows.iter().map(|r| r.provenance_id.as_str())),
            utf8_array(rows.iter().map(|r| r.claim_id.as_str())),
            utf8_array(rows.iter().map(|r| r.source_hash.as_str())),
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.byte_start))),
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.byte_end))),
        ],
    )
}

pub fn write_spans(path: &Path, rows: &mut [SpanRow]) -> CoreResult<()> {
    rows.sort_by(|a, b| a.span_id.cmp(&b.span_id));
    write_batch(
        path,
        spans_schema(),
        vec![
            utf8_array(rows.iter().map(|r| r.span_id.as_str())),
            utf8_array(rows.iter().map(|r| r.source_hash.as_str())),
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.byte_start))),
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.byte_end))),
            utf8_array(rows.iter().map(|r| r.text.as_str())),
        ],
    )
}

/// Read every batch of a table, enforcing the expected schema and the
/// all-columns-non-null rule. `rel` is the shard-relative path used in
/// issue locations.
fn read_batches(
    path: &Path,
    rel: &str,
    expected: &SchemaRef,
) -> Result<Vec<RecordBatch>, Vec<VerifyIssue>> {
    let fail = |code: ErrorCode, msg: String| vec![VerifyIssue::new(code, rel, msg)];

    let file = File::open(path)
        .map_err(|e| fail(ErrorCode::SchemaType, format!("table unreadable: {e}")))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| fail(ErrorCode::SchemaType, format!("not a readable columnar file: {e}")))?;

    let actual = builder.schema().clone();
    let mut issues = Vec::new();
    if actual.fields().len() != expected.fields().len() {
        issues.push(VerifyIssue::new(
            ErrorCode::SchemaType,
            rel,
            format!(
                "expected {} columns, found {}",
                expected.fields().len(),
                actual.fields().len()
            ),
        ));
    } else {
        for (af, ef) in actual.fields().iter().zip(expected.fields()) {
            if af.name() != ef.name() || af.data_type() != ef.data_type() {
                issues.push(VerifyIssue::new(
                    ErrorCode::SchemaType,
                    rel,
                    format!(
                        "column mismatch: expected {} {:?}, found {} {:?}",
                        ef.name(),
                        ef.data_type(),
                        af.name(),
                        af.data_type()
                    ),
                ));
            }
        }
    }
    if !issues.is_empty() {
        return Err(issues);
    }

    let reader = builder
        .build()
        .map_err(|e| fail(ErrorCode::SchemaType, format!("table unreadable: {e}")))?;
    let mut batches = Vec::new();
    for batch in reader {
        let batch =
            batch.map_err(|e| fail(ErrorCode::SchemaType, format!("corrupt record batch: {e}")))?;
        for (idx, column) in batch.columns().iter().enumerate() {
            if column.null_count() > 0 {
                issues.push(VerifyIssue::new(
                    ErrorCode::SchemaNull,
                    rel,
                    format!(
                        "column {} contains {} null value(s)",
                        expected.field(idx).name(),
                        column.null_count()
                    ),
                ));
            }
        }
        batches.push(batch);
    }
    if !issues.is_empty() {
        return Err(issues);
    }
    Ok(batches)
}

fn utf8_values(batch: &RecordBatch, idx: usize, rel: &str) -> Result<Vec<String>, Vec<VerifyIssue>> {
    let arr = batch
        .column(idx)
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| {
            vec![VerifyIssue::new(
                ErrorCode::SchemaType,
                rel,
                format!("column {idx} is not Utf8"),
            )]
        })?;
    Ok((0..arr.len()).map(|i| arr.value(i).to_string()).collect())
}

fn i64_values(batch: &RecordBatch, idx: usize, rel: &str) -> Result<Vec<i64>, Vec<VerifyIssue>> {
    let arr = batch
        .column(idx)
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| {
            vec![VerifyIssue::new(
                ErrorCode::SchemaType,
                rel,
                format!("column {idx} is not Int64"),
            )]
        })?;
    Ok(arr.values().to_vec())
}

pub fn read_entities(path: &Path, rel: &str) -> Result<Vec<EntityRow>, Vec<VerifyIssue>> {
    let batches = read_batches(path, rel, &entities_schema())?;
    let mut rows = Vec::new();
    for batch in &batches {
        let ids = utf8_values(batch, 0, rel)?;
        let namespaces = utf8_values(batch, 1, rel)?;
        let labels = utf8_values(batch, 2, rel)?;
        let types = utf8_values(batch, 3, rel)?;
        for i in 0..batch.num_rows() {
            rows.push(EntityRow {
                entity_id: ids[i].clone(),
                namespace: namespaces[i].clone(),
                label: labels[i].clone(),
                entity_type: types[i].clone(),
            });
        }
    }
    Ok(rows)
}

pub fn read_claims(path: &Path, rel: &str) -> Result<Vec<ClaimRow>, Vec<VerifyIssue>> {
    let batches = read_batches(path, rel, &claims_schema())?;
    let mut rows = Vec::new();
    let mut issues = Vec::new();
    let mut row_index = 0usize;
    for batch in &batches {
        let ids = utf8_values(batch, 0, rel)?;
        let subjects = utf8_values(batch, 1, rel)?;
        let predicates = utf8_values(batch, 2, rel)?;
        let objects = utf8_values(batch, 3, rel)?;
        let object_types = utf8_values(batch, 4, rel)?;
        let tiers = batch
            .column(5)
            .as_any()
            .downcast_ref::<Int8Array>()
            .ok_or_else(|| {
                vec![VerifyIssue::new(ErrorCode::SchemaType, rel, "column tier is not Int8")]
            })?;
        for i in 0..batch.num_rows() {
            let tier = tiers.value(i);
            if !VALID_OBJECT_TYPES.contains(&object_types[i].as_str()) {
                issues.push(VerifyIssue::new(
                    ErrorCode::SchemaType,
                    format!("{rel}:{row_index}"),
                    format!("object_type {:?} is not accepted", object_types[i]),
                ));
            }
            if !VALID_TIERS.contains(&tier) {
                issues.push(VerifyIssue::new(
                    ErrorCode::SchemaType,
                    format!("{rel}:{row_index}"),
                    format!("tier {tier} is outside the accepted range"),
                ));
            }
            rows.push(ClaimRow {
                claim_id: ids[i].clone(),
                subject: subjects[i].clone(),
                predicate: predicates[i].clone(),
                object: objects[i].clone(),
                object_type: object_types[i].clone(),
                tier,
            });
            row_index += 1;
        }
    }
    if !issues.is_empty() {
        return Err(issues);
    }
    Ok(rows)
}

pub fn read_provenance(path: &Path, rel: &str) -> Result<Vec<ProvenanceRow>, Vec<VerifyIssue>> {
    let batches = read_batches(path, rel, &provenance_schema())?;
    let mut rows = Vec::new();
    for batch in &batches {
        let ids = utf8_values(batch, 0, rel)?;
        let claim_ids = utf8_values(batch, 1, rel)?;
        let hashes = utf8_values(batch, 2, rel)?;
        let starts = i64_values(batch, 3, rel)?;
        let ends = i64_values(batch, 4, rel)?;
        for i in 0..batch.num_rows() {
            rows.push(ProvenanceRow {
                provenance_id: ids[i].clone(),
                claim_id: claim_ids[i].clone(),
                source_hash: hashes[i].clone(),
                byte_start: starts[i],
                byte_end: ends[i],
            });
        }
    }
    Ok(rows)
}

pub fn read_spans(path: &Path, rel: &str) -> Result<Vec<SpanRow>, Vec<VerifyIssue>> {
    let batches = read_batches(path, rel, &spans_schema())?;
    let mut rows = Vec::new();
    for batch in &batches {
        let ids = utf8_values(batch, 0, rel)?;
        let hashes = utf8_values(batch, 1, rel)?;
        let starts = i64_values(batch, 2, rel)?;
        let ends = i64_values(batch, 3, rel)?;
        let texts = utf8_values(batch, 4, rel)?;
        for i in 0..batch.num_rows() {
            rows.push(SpanRow {
                span_id: ids[i].clone(),
                source_hash: hashes[i].clone(),
                byte_start: starts[i],
                byte_end: ends[i],
                text: texts[i].clone(),
            });
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn sample_entities() -> Vec<EntityRow> {
        vec![
            EntityRow {
                entity_id: "e_zzz".into(),
                namespace: "test".into(),
                label: "zeta".into(),
                entity_type: "concept".into(),
            },
            EntityRow {
                entity_id: "e_aaa".into(),
                namespace: "test".into(),
                label: "alpha".into(),
                entity_type: "concept".into(),
            },
        ]
    }

    #[test]
    fn writer_sorts_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entities.parquet");
        let mut rows = sample_entities();
        write_entities(&path, &mut rows).unwrap();
        let back = read_entities(&path, "graph/entities.parquet").unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[0].entity_id, "e_aaa");
        assert_eq!(back[1].entity_id, "e_zzz");
    }

    #[test]
    fn identical_rows_produce_identical_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.parquet");
        let b = dir.path().join("b.parquet");
        write_entities(&a, &mut sample_entities()).unwrap();
        write_entities(&b, &mut sample_entities()).unwrap();
        assert_eq!(fs::read(&a).unwrap(), fs::read(&b).unwrap());
    }

    #[test]
    fn wrong_schema_is_a_type_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entities.parquet");
        write_entities(&path, &mut sample_entities()).unwrap();
        let err = read_claims(&path, "graph/claims.parquet").unwrap_err();
        assert!(err.iter().all(|i| i.code == ErrorCode::SchemaType));
    }

    #[test]
    fn nulls_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entities.parquet");

        // Write a structurally matching table with one null label.
        let schema = Arc::new(Schema::new(vec![
            Field::new("entity_id", DataType::Utf8, false),
            Field::new("namespace", DataType::Utf8, false),
            Field::new("label", DataType::Utf8, true),
            Field::new("entity_type", DataType::Utf8, false),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(vec![Some("e_a")])),
                Arc::new(StringArray::from(vec![Some("ns")])),
                Arc::new(StringArray::from(vec![None::<&str>])),
                Arc::new(StringArray::from(vec![Some("concept")])),
            ],
        )
        .unwrap();
        let file = File::create(&path).unwrap();
        let mut writer = ArrowWriter::try_new(file, schema, Some(writer_properties().unwrap())).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let err = read_entities(&path, "graph/entities.parquet").unwrap_err();
        assert!(err.iter().any(|i| i.code == ErrorCode::SchemaNull));
    }

    #[test]
    fn claim_enum_violations_are_type_errors_with_row_locations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("claims.parquet");
        let mut rows = vec![ClaimRow {
            claim_id: "c_x".into(),
            subject: "e_a".into(),
            predicate: "treats".into(),
            object: "e_b".into(),
            object_type: "literal:decimal".into(),
            tier: 9,
        }];
        write_claims(&path, &mut rows).unwrap();
        let err = read_claims(&path, "graph/claims.parquet").unwrap_err();
        assert_eq!(err.len(), 2);
        assert!(err.iter().all(|i| i.location == "graph/claims.parquet:0"));
    }

    #[test]
    fn empty_tables_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spans.parquet");
        write_spans(&path, &mut []).unwrap();
        assert!(read_spans(&path, "evidence/spans.parquet").unwrap().is_empty());
    }
}
