use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{Datelike, Local};
use genpdf::style::Style;
use genpdf::{elements, Alignment, Element as _};
use image::DynamicImage;
use tempfile::TempDir;
use tracing::info;

use crate::config::CONFIG;
use crate::error::SafetyGuardError;
use crate::utils::detection_utils::required_ppe;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Pdf,
    Html,
}

impl ReportFormat {
    pub fn media_type(self) -> &'static str {
        match self {
            ReportFormat::Pdf => "application/pdf",
            ReportFormat::Html => "text/html",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ReportFormat::Pdf => "pdf",
            ReportFormat::Html => "html",
        }
    }
}

impl std::str::FromStr for ReportFormat {
    type Err = SafetyGuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pdf" => Ok(ReportFormat::Pdf),
            "html" => Ok(ReportFormat::Html),
            other => Err(SafetyGuardError::ReportError(format!(
                "Unknown report format: {}",
                other
            ))),
        }
    }
}

/// Turns one inspection result into a downloadable artifact.
///
/// Reports are written into a transient directory owned by the builder; the
/// caller is responsible for delivering (and deleting) the file before the
/// builder is dropped. Unlike the detection hot path, every failure here
/// propagates: report generation is an explicit user action.
pub struct ReportBuilder {
    temp_dir: TempDir,
}

impl ReportBuilder {
    pub fn new() -> Result<Self, SafetyGuardError> {
        Ok(Self {
            temp_dir: TempDir::new()?,
        })
    }

    pub fn generate(
        &self,
        annotated_frame: &DynamicImage,
        missing_items: &[String],
        item_counts: &HashMap<String, u32>,
        format: ReportFormat,
    ) -> Result<(PathBuf, &'static str), SafetyGuardError> {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");

        let image_path = self.temp_dir.path().join(format!("detection_{}.png", stamp));
        annotated_frame.save(&image_path)?;

        let report_path = self
            .temp_dir
            .path()
            .join(format!("report_{}.{}", stamp, format.extension()));
        match format {
            ReportFormat::Pdf => {
                self.generate_pdf(&image_path, missing_items, item_counts, &report_path)?
            }
            ReportFormat::Html => {
                self.generate_html(&image_path, missing_items, item_counts, &report_path)?
            }
        }

        info!(
            "Generated {} report at {}",
            format.extension(),
            report_path.display()
        );
        Ok((report_path, format.media_type()))
    }

    fn generate_pdf(
        &self,
        image_path: &Path,
        missing_items: &[String],
        item_counts: &HashMap<String, u32>,
        report_path: &Path,
    ) -> Result<(), SafetyGuardError> {
        let font_family =
            genpdf::fonts::from_files(&CONFIG.report.font_dir, &CONFIG.report.font_name, None)?;
        let mut doc = genpdf::Document::new(font_family);
        doc.set_title(CONFIG.report.title.clone());
        let mut decorator = genpdf::SimplePageDecorator::new();
        decorator.set_margins(12);
        doc.set_page_decorator(decorator);

        doc.push(
            elements::Paragraph::new(CONFIG.report.title.clone())
                .styled(Style::new().bold().with_font_size(18)),
        );
        doc.push(elements::Paragraph::new(CONFIG.report.subtitle.clone()));
        doc.push(elements::Paragraph::new(format!(
            "Inspection time: {}",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        )));
        doc.push(elements::Break::new(1));

        if missing_items.is_empty() {
            doc.push(
                elements::Paragraph::new("Verdict: full PPE compliance")
                    .styled(Style::new().bold()),
            );
        } else {
            doc.push(
                elements::Paragraph::new(format!(
                    "Verdict: safety violation, {} item(s) missing",
                    missing_items.len()
                ))
                .styled(Style::new().bold()),
            );
            for item in missing_items {
                doc.push(elements::Paragraph::new(format!("Missing: {}", item)));
            }
        }
        doc.push(elements::Break::new(1));

        doc.push(elements::Paragraph::new("Detected equipment:"));
        for item in required_ppe() {
            let count = item_counts.get(item).copied().unwrap_or(0);
            doc.push(elements::Paragraph::new(format!("{}: {}", item, count)));
        }
        doc.push(elements::Break::new(1));

        doc.push(elements::Image::from_path(image_path)?.with_alignment(Alignment::Center));
        doc.push(elements::Break::new(1));
        doc.push(
            elements::Paragraph::new(format!(
                "(c) {} {}",
                Local::now().year(),
                CONFIG.report.footer
            ))
            .styled(Style::new().with_font_size(8)),
        );

        doc.render_to_file(report_path)?;
        Ok(())
    }

    fn generate_html(
        &self,
        image_path: &Path,
        missing_items: &[String],
        item_counts: &HashMap<String, u32>,
        report_path: &Path,
    ) -> Result<(), SafetyGuardError> {
        let image_base64 = BASE64.encode(std::fs::read(image_path)?);

        let verdict = if missing_items.is_empty() {
            "<h2 class=\"ok\">Full PPE compliance</h2>".to_string()
        } else {
            let tags: Vec<String> = missing_items
                .iter()
                .map(|item| format!("<span class=\"tag\">{}</span>", item))
                .collect();
            format!(
                "<h2 class=\"bad\">Safety violation, {} item(s) missing</h2>\n<p>{}</p>",
                missing_items.len(),
                tags.join(" ")
            )
        };

        let counts: Vec<String> = required_ppe()
            .iter()
            .map(|item| {
                format!(
                    "<tr><td>{}</td><td>{}</td></tr>",
                    item,
                    item_counts.get(item).copied().unwrap_or(0)
                )
            })
            .collect();

        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
<style>
body {{ font-family: sans-serif; margin: 2em; color: #212529; }}
.ok {{ color: #2e7d32; }}
.bad {{ color: #c62828; }}
.tag {{ background: #ffebee; color: #c62828; padding: 4px 10px; border-radius: 8px; }}
table {{ border-collapse: collapse; }}
td {{ border: 1px solid #dee2e6; padding: 6px 14px; }}
img {{ max-width: 100%; margin-top: 1em; }}
footer {{ margin-top: 2em; font-size: 0.8em; color: #6c757d; }}
</style>
</head>
<body>
<h1>{title}</h1>
<p>{subtitle}</p>
<p>Inspection time: {timestamp}</p>
{verdict}
<h3>Detected equipment</h3>
<table>{counts}</table>
<img src="data:image/png;base64,{image}" alt="PPE detection result">
<footer>(c) {year} {footer}</footer>
</body>
</html>
"#,
            title = CONFIG.report.title,
            subtitle = CONFIG.report.subtitle,
            timestamp = Local::now().format("%Y-%m-%d %H:%M:%S"),
            verdict = verdict,
            counts = counts.join("\n"),
            image = image_base64,
            year = Local::now().year(),
            footer = CONFIG.report.footer,
        );

        std::fs::write(report_path, html)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn test_frame() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::new(32, 32))
    }

    #[test]
    fn format_is_parsed_case_insensitively() {
        assert_eq!("pdf".parse::<ReportFormat>().unwrap(), ReportFormat::Pdf);
        assert_eq!("HTML".parse::<ReportFormat>().unwrap(), ReportFormat::Html);
        assert!("docx".parse::<ReportFormat>().is_err());
    }

    #[test]
    fn html_report_embeds_image_and_missing_items() {
        let builder = ReportBuilder::new().unwrap();
        let missing = vec!["helmet".to_string()];
        let mut counts = HashMap::new();
        counts.insert("vest".to_string(), 1u32);

        let (path, media_type) = builder
            .generate(&test_frame(), &missing, &counts, ReportFormat::Html)
            .unwrap();

        assert_eq!(media_type, "text/html");
        let html = std::fs::read_to_string(&path).unwrap();
        assert!(html.contains("data:image/png;base64,"));
        assert!(html.contains("helmet"));
        assert!(html.contains("Safety violation"));
    }

    #[test]
    fn compliant_html_report_has_no_violation_section() {
        let builder = ReportBuilder::new().unwrap();
        let (path, _) = builder
            .generate(&test_frame(), &[], &HashMap::new(), ReportFormat::Html)
            .unwrap();

        let html = std::fs::read_to_string(&path).unwrap();
        assert!(html.contains("Full PPE compliance"));
        assert!(!html.contains("Safety violation"));
    }

    #[test]
    fn pdf_report_without_fonts_fails_loudly() {
        // The default font directory does not exist in the test environment;
        // report errors must propagate instead of degrading silently.
        let builder = ReportBuilder::new().unwrap();
        let result = builder.generate(&test_frame(), &[], &HashMap::new(), ReportFormat::Pdf);
        assert!(result.is_err());
    }
}
