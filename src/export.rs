use crate::config::{CompressionType, ExportConfig, ExportFormat};
use crate::table::Table;
use anyhow::{Context, Result};
use csv::WriterBuilder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::time::Instant;
use tracing::info;

pub struct Exporter {
    config: ExportConfig,
}

impl Exporter {
    pub fn new(config: ExportConfig) -> Self {
        Self { config }
    }

    /// Write `table` to the configured output file
    pub fn export(&self, table: &Table) -> Result<ExportStats> {
        let start_time = Instant::now();

        let file = File::create(&self.config.output_file)
            .with_context(|| format!("Failed to create output file {}", self.config.output_file))?;

        let writer: Box<dyn Write> = match self.config.compression {
            CompressionType::Gzip => Box::new(BufWriter::with_capacity(
                self.config.buffer_size,
                GzEncoder::new(file, Compression::default()),
            )),
            CompressionType::None => {
                Box::new(BufWriter::with_capacity(self.config.buffer_size, file))
            }
        };

        let mut csv_writer = WriterBuilder::new()
            .delimiter(self.delimiter())
            .flexible(false)
            .from_writer(writer);

        if self.config.include_header {
            csv_writer.write_record(table.columns())?;
        }

        for row in table.rows() {
            csv_writer.write_record(row.iter().map(|v| v.to_string()))?;
        }

        // into_inner flushes the csv buffer; dropping the BufWriter finishes the gzip stream
        let mut writer = csv_writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("Failed to flush output: {}", e.error()))?;
        writer.flush()?;
        drop(writer);

        let rows = table.row_count() as u64;
        let duration = start_time.elapsed();
        let file_size = std::fs::metadata(&self.config.output_file)?.len();
        let avg_row_size = if rows > 0 {
            file_size as f64 / rows as f64
        } else {
            0.0
        };

        Ok(ExportStats {
            rows_exported: rows,
            duration_secs: duration.as_secs_f64(),
            file_size_bytes: file_size,
            avg_row_size_bytes: avg_row_size,
            output_file: self.config.output_file.clone(),
        })
    }

    fn delimiter(&self) -> u8 {
        match self.config.format {
            ExportFormat::Tsv => b'\t',
            ExportFormat::Csv | ExportFormat::Custom => {
                if self.config.delimiter.len() == 1 {
                    self.config.delimiter.as_bytes()[0]
                } else {
                    b','
                }
            }
        }
    }
}

pub struct ExportStats {
    pub rows_exported: u64,
    pub duration_secs: f64,
    pub file_size_bytes: u64,
    pub avg_row_size_bytes: f64,
    pub output_file: String,
}

impl ExportStats {
    pub fn print_summary(&self) {
        info!("Export Summary:");
        info!("  Output file: {}", self.output_file);
        info!("  Rows exported: {}", self.rows_exported);
        info!("  Duration: {:.2} seconds", self.duration_secs);
        info!(
            "  File size: {} bytes ({:.2} MB)",
            self.file_size_bytes,
            self.file_size_bytes as f64 / 1024.0 / 1024.0
        );
        if self.duration_secs > 0.0 {
            let rows_per_sec = self.rows_exported as f64 / self.duration_secs;
            info!("  Speed: {:.2} rows/second", rows_per_sec);
        }
        info!("  Average row size: {:.2} bytes", self.avg_row_size_bytes);
    }
}
