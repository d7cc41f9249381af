use anyhow::{anyhow, Context};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::collections::HashSet;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const RESULTS_DIR: &str = "results";
pub const BUNDLE_FORMAT_V1: &str = "resultd-results-v1";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
}

#[derive(Debug, Clone)]
pub struct VerifySummary {
    pub school_id: String,
    pub result_key: String,
    pub record_count: usize,
}

fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Write `(studentId, payloadJson)` records of one result key into a zip with
/// a checksummed manifest.
pub fn export_results_bundle(
    school_id: &str,
    result_key: &str,
    records: &[(String, String)],
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut entries = Vec::with_capacity(records.len());
    for (student_id, payload) in records {
        let name = format!("{}/{}.json", RESULTS_DIR, student_id);
        zip.start_file(name.as_str(), opts)
            .with_context(|| format!("failed to start entry {}", name))?;
        zip.write_all(payload.as_bytes())
            .with_context(|| format!("failed to write entry {}", name))?;
        entries.push(json!({
            "path": name,
            "sha256": sha256_hex(payload.as_bytes()),
        }));
    }

    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        "schoolId": school_id,
        "resultKey": result_key,
        "recordCount": records.len(),
        "entries": entries,
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        entry_count: records.len() + 1,
    })
}

/// Re-read a bundle and check every entry against its manifest checksum.
/// The manifest must list exactly the `results/` entries of the archive and
/// agree with its own `recordCount`.
pub fn verify_results_bundle(in_path: &Path) -> anyhow::Result<VerifySummary> {
    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != BUNDLE_FORMAT_V1 {
        return Err(anyhow!("unsupported bundle format: {}", format));
    }

    let entries = manifest
        .get("entries")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    let record_count = manifest
        .get("recordCount")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| anyhow!("manifest missing recordCount"))?;
    if entries.len() as u64 != record_count {
        return Err(anyhow!(
            "manifest lists {} entries but recordCount is {}",
            entries.len(),
            record_count
        ));
    }

    let mut listed = HashSet::with_capacity(entries.len());
    for entry in &entries {
        let path = entry
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("manifest entry without path"))?;
        if !listed.insert(path.to_string()) {
            return Err(anyhow!("manifest lists {} twice", path));
        }
        let expected = entry.get("sha256").and_then(|v| v.as_str()).unwrap_or("");
        let mut bytes = Vec::new();
        archive
            .by_name(path)
            .with_context(|| format!("bundle missing {}", path))?
            .read_to_end(&mut bytes)
            .with_context(|| format!("failed to read {}", path))?;
        if sha256_hex(&bytes) != expected {
            return Err(anyhow!("checksum mismatch for {}", path));
        }
    }

    let results_prefix = format!("{}/", RESULTS_DIR);
    if let Some(extra) = archive
        .file_names()
        .find(|name| name.starts_with(&results_prefix) && !listed.contains(*name))
    {
        return Err(anyhow!("bundle entry {} is not in the manifest", extra));
    }

    let text = |key: &str| {
        manifest
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string()
    };
    Ok(VerifySummary {
        school_id: text("schoolId"),
        result_key: text("resultKey"),
        record_count: entries.len(),
    })
}
