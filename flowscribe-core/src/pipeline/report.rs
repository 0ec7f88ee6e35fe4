use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{FlowscribeError, FlowscribeResult};
use crate::models::{FlowDocument, FlowSummary, GeneratedImage, Interaction};

const MAX_COMPONENT_LEN: usize = 30;
pub(crate) const IMAGES_SUBDIR: &str = "images";

/// Makes `raw` safe for use inside a file name.
///
/// Spaces and path separators become `_`, anything outside
/// `[A-Za-z0-9_.-]` is dropped, and the result is capped at 30 characters.
/// Never returns an empty string.
pub fn sanitize_filename_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| match c {
            ' ' | '/' | '\\' => '_',
            other => other,
        })
        .filter(|c| c.is_ascii_alphanumeric() || matches!(*c, '_' | '-' | '.'))
        .take(MAX_COMPONENT_LEN)
        .collect();

    if cleaned.is_empty() {
        "flow".to_string()
    } else {
        cleaned
    }
}

pub fn report_filename(flow: &FlowDocument, generated_at: DateTime<Utc>) -> String {
    format!(
        "Flow_Analysis_{}_{}_{}.md",
        sanitize_filename_component(&flow.name),
        sanitize_filename_component(flow.upload_id()),
        generated_at.format("%Y%m%d_%H%M%S")
    )
}

/// Renders the markdown report. `image_ref` is the path the report links to,
/// relative to the report itself.
pub fn render_report(
    flow: &FlowDocument,
    summary: &str,
    interactions: &[Interaction],
    image_ref: Option<&str>,
    generated_at: DateTime<Utc>,
) -> String {
    let mut md = String::new();

    let _ = writeln!(md, "# Flow Analysis Report\n");
    let _ = writeln!(md, "**Flow Name:** {}  ", flow.name);
    let _ = writeln!(md, "**Upload ID:** {}  ", flow.upload_id());
    let _ = writeln!(md, "**Created By:** {}  ", flow.author());
    let _ = writeln!(
        md,
        "**Generated:** {}\n",
        generated_at.format("%Y-%m-%d %H:%M:%S")
    );
    md.push_str("---\n\n");

    md.push_str("## Summary\n\n");
    let _ = writeln!(md, "{}\n", summary.trim());
    md.push_str("---\n\n");

    md.push_str("## User Interactions\n\n");
    if interactions.is_empty() {
        md.push_str("*No user interactions were recorded in this flow.*\n\n");
    } else {
        md.push_str("This section details all the actions the user performed during the flow:\n\n");
        for interaction in interactions {
            let _ = writeln!(
                md,
                "### {}. {}\n",
                interaction.step_number, interaction.description
            );
            if !interaction.page_title.is_empty() {
                let _ = writeln!(md, "**Page:** {}\n", interaction.page_title);
            }
            if !interaction.page_url.is_empty() {
                let _ = writeln!(md, "**URL:** {}\n", interaction.page_url);
            }
            md.push_str("---\n\n");
        }
    }

    md.push_str("## Social Media Image\n\n");
    match image_ref {
        Some(path) => {
            let _ = writeln!(md, "![Social Media Image]({})\n", path);
            md.push_str("*Generated image representing the user flow for social media sharing.*\n\n");
        }
        None => {
            md.push_str("*Image generation was not completed or image file was not found.*\n\n");
        }
    }

    let created = flow
        .created_at()
        .map(|c| c.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "N/A".to_string());

    md.push_str("---\n\n");
    md.push_str("## Flow Metadata\n\n");
    let _ = writeln!(md, "- **Total Interactions:** {}", interactions.len());
    let _ = writeln!(md, "- **Flow Type:** {}", flow.use_case());
    let _ = writeln!(md, "- **Created:** {}", created);
    let _ = writeln!(md, "- **Schema Version:** {}\n", flow.schema_version_label());
    md.push_str("---\n\n");
    md.push_str("*Report generated by Flowscribe*\n");

    md
}

/// Writes the report (and a copy of the image) under an output directory.
pub struct ReportAssembler {
    output_dir: PathBuf,
}

impl ReportAssembler {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Returns the path of the written report.
    pub fn assemble(
        &self,
        flow: &FlowDocument,
        summary: &FlowSummary,
        interactions: &[Interaction],
        image: Option<&GeneratedImage>,
        generated_at: DateTime<Utc>,
    ) -> FlowscribeResult<PathBuf> {
        std::fs::create_dir_all(&self.output_dir).map_err(|e| {
            FlowscribeError::ReportWriteFailed(format!(
                "cannot create {}: {}",
                self.output_dir.display(),
                e
            ))
        })?;

        let image_ref = image.and_then(|img| self.copy_image(&img.file_path));
        let markdown = render_report(
            flow,
            &summary.text,
            interactions,
            image_ref.as_deref(),
            generated_at,
        );

        let path = self.output_dir.join(report_filename(flow, generated_at));
        std::fs::write(&path, markdown).map_err(|e| {
            FlowscribeError::ReportWriteFailed(format!("{}: {}", path.display(), e))
        })?;

        info!(path = %path.display(), "Report written");
        Ok(path)
    }

    /// Copies the image next to the report and returns its relative link,
    /// or `None` (with a warning) if it cannot be copied.
    fn copy_image(&self, source: &Path) -> Option<String> {
        let file_name = source.file_name()?.to_string_lossy().to_string();
        let images_dir = self.output_dir.join(IMAGES_SUBDIR);
        let dest = images_dir.join(&file_name);

        let copied = std::fs::create_dir_all(&images_dir).and_then(|_| {
            if dest.exists() && same_file(source, &dest) {
                Ok(0)
            } else {
                std::fs::copy(source, &dest)
            }
        });

        match copied {
            Ok(_) => Some(format!("{}/{}", IMAGES_SUBDIR, file_name)),
            Err(e) => {
                warn!(
                    "Could not copy image {} into report directory: {}",
                    source.display(),
                    e
                );
                None
            }
        }
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
