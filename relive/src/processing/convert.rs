//! Chat transcript → ASS subtitle conversion via the external converter.

use std::path::Path;

use tokio::process::Command;
use tracing::{error, info, warn};

use crate::config::ProcessingSettings;
use crate::processing::{part_sibling, probe};
use crate::utils::fs::files_with_extension;

/// Convert every eligible `X.xml` in `dir` to `X.ass`.
///
/// Eligible means: the paired `X.flv` exists, `X.flv.part` does not (the
/// segment is finalized) and `X.ass` was not already produced. The source
/// transcript is preserved unless uploaded-file deletion is configured.
pub async fn convert_transcripts(settings: &ProcessingSettings, dir: &Path, delete_xml: bool) {
    let transcripts = match files_with_extension(dir, "xml").await {
        Ok(files) => files,
        Err(e) => {
            error!(error = %e, "cannot scan for transcripts");
            return;
        }
    };

    let mut converted = 0u32;
    let mut skipped = 0u32;
    let mut failed = 0u32;

    for xml in transcripts {
        let flv = xml.with_extension("flv");
        let ass = xml.with_extension("ass");

        if tokio::fs::try_exists(&part_sibling(&flv)).await.unwrap_or(false) {
            info!(file = %xml.display(), "segment still recording, conversion deferred");
            skipped += 1;
            continue;
        }
        if !tokio::fs::try_exists(&flv).await.unwrap_or(false) {
            warn!(file = %xml.display(), "no paired recording, conversion skipped");
            skipped += 1;
            continue;
        }
        if tokio::fs::try_exists(&ass).await.unwrap_or(false) {
            skipped += 1;
            continue;
        }

        let (width, height) = match probe::video_dimensions(&settings.ffprobe_path, &flv).await {
            Ok(dims) => dims,
            Err(e) => {
                error!(file = %flv.display(), error = %e, "dimension probe failed");
                failed += 1;
                continue;
            }
        };

        let args = substitute_args(
            &settings.converter_args,
            &xml.to_string_lossy(),
            &ass.to_string_lossy(),
            width,
            height,
            settings.font_size,
            settings.sc_font_size,
        );

        info!(
            input = %xml.display(),
            output = %ass.display(),
            width,
            height,
            "converting transcript"
        );

        let run = Command::new(&settings.converter_path)
            .args(&args)
            .env("LC_ALL", "C")
            .output()
            .await;

        let output = match run {
            Ok(output) => output,
            Err(e) => {
                error!(converter = %settings.converter_path, error = %e, "converter failed to start");
                failed += 1;
                continue;
            }
        };

        if !output.status.success() || !tokio::fs::try_exists(&ass).await.unwrap_or(false) {
            error!(
                file = %xml.display(),
                code = ?output.status.code(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "conversion produced no subtitle file"
            );
            failed += 1;
            continue;
        }

        converted += 1;

        if delete_xml {
            if let Err(e) = tokio::fs::remove_file(&xml).await {
                warn!(file = %xml.display(), error = %e, "failed to delete converted transcript");
            }
        }
    }

    info!(converted, skipped, failed, "transcript conversion finished");
}

/// Fill the converter argument template.
pub fn substitute_args(
    template: &[String],
    input: &str,
    output: &str,
    width: u32,
    height: u32,
    font_size: u32,
    sc_font_size: u32,
) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            arg.replace("{input}", input)
                .replace("{output}", output)
                .replace("{width}", &width.to_string())
                .replace("{height}", &height.to_string())
                .replace("{font_size}", &font_size.to_string())
                .replace("{sc_font_size}", &sc_font_size.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_all_placeholders() {
        let template: Vec<String> = ["-i", "{input}", "-o", "{output}", "-r", "{width}x{height}", "-s", "{font_size}"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let args = substitute_args(&template, "a.xml", "a.ass", 1920, 1080, 50, 48);
        assert_eq!(args, vec!["-i", "a.xml", "-o", "a.ass", "-r", "1920x1080", "-s", "50"]);
    }
}
