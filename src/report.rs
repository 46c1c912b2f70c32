use std::io::{BufWriter, Cursor};

use ::image::DynamicImage;
use printpdf::*;
use thiserror::Error;

use crate::config::AppConfig;
use crate::snapshot::{self, Preview, TileFetcher};
use crate::types::Plot;

pub const EXPORT_FILENAME: &str = "talhoes-mapeados.pdf";

const REPORT_TITLE: &str = "Talhões Mapeados";

// A4 portrait, laid out in mm from the top-left like the capture screen.
const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const LEFT_MARGIN_MM: f32 = 10.0;
const TITLE_TOP_MM: f32 = 20.0;
const IMAGE_TOP_MM: f32 = 25.0;
const IMAGE_WIDTH_MM: f32 = 190.0;
const IMAGE_HEIGHT_MM: f32 = 100.0;
const CROP_TOP_MM: f32 = 135.0;
const AREA_TOP_MM: f32 = 142.0;
const NOTES_TOP_MM: f32 = 149.0;
const FOOTER_BOTTOM_MM: f32 = 10.0;

const TITLE_FONT_SIZE: f32 = 16.0;
const BODY_FONT_SIZE: f32 = 12.0;
const FOOTER_FONT_SIZE: f32 = 8.0;

const PREVIEW_DPI: f32 = 300.0;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("no plots to export")]
    NoPlots,
    #[error("no pages could be rendered: {0}")]
    NothingRendered(String),
    #[error("pdf generation failed: {0}")]
    Pdf(String),
}

/// Finished report plus everything the caller should relay to the user.
pub struct ExportOutcome {
    pub pdf: Vec<u8>,
    pub pages: usize,
    pub warnings: Vec<String>,
}

/// Render one A4 page per plot and assemble the report.
///
/// A plot whose boundary cannot be rendered is skipped with a warning rather
/// than sinking the whole export; a page whose basemap is incomplete still
/// ships, also with a warning. Only an empty store or a report where every
/// single page was skipped is an error.
pub async fn export_pdf(
    plots: &[Plot],
    config: &AppConfig,
    fetcher: &dyn TileFetcher,
) -> Result<ExportOutcome, ExportError> {
    if plots.is_empty() {
        return Err(ExportError::NoPlots);
    }

    // printpdf documents are not Send; every await must be finished before
    // any PDF state exists.
    let mut warnings = Vec::new();
    let mut rendered: Vec<(&Plot, Preview)> = Vec::new();
    for plot in plots {
        let preview = match snapshot::render(plot, &config.preview, &config.tiles, fetcher).await {
            Ok(preview) => preview,
            Err(err) => {
                warnings.push(format!("Talhão \"{}\" skipped: {err}", plot.name));
                continue;
            }
        };
        if preview.tiles_failed > 0 {
            warnings.push(format!(
                "Talhão \"{}\": {} of {} map tiles failed to load",
                plot.name, preview.tiles_failed, preview.tiles_total
            ));
        }
        rendered.push((plot, preview));
    }

    let mut document: Option<ReportDoc> = None;
    let mut pages = 0;
    for (plot, preview) in rendered {
        // The document is only created once a page is actually going onto it.
        let (font, layer) = match document.as_ref() {
            Some(doc) => (doc.font.clone(), doc.add_page()),
            None => {
                let (doc, first_layer) = ReportDoc::new()?;
                let font = doc.font.clone();
                document = Some(doc);
                (font, first_layer)
            }
        };
        draw_plot_page(&layer, &font, plot, preview);
        pages += 1;
    }

    let document = match document {
        Some(doc) => doc,
        None => return Err(ExportError::NothingRendered(warnings.join("; "))),
    };
    let mut pdf = Vec::new();
    {
        let mut writer = BufWriter::new(Cursor::new(&mut pdf));
        document
            .doc
            .save(&mut writer)
            .map_err(|err| ExportError::Pdf(err.to_string()))?;
    }

    Ok(ExportOutcome {
        pdf,
        pages,
        warnings,
    })
}

struct ReportDoc {
    doc: PdfDocumentReference,
    font: IndirectFontRef,
}

impl ReportDoc {
    fn new() -> Result<(Self, PdfLayerReference), ExportError> {
        let (doc, page, layer) = PdfDocument::new(
            REPORT_TITLE,
            Mm(PAGE_WIDTH_MM),
            Mm(PAGE_HEIGHT_MM),
            "Layer 1",
        );
        let font = doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(|err| ExportError::Pdf(err.to_string()))?;
        let first_layer = doc.get_page(page).get_layer(layer);
        Ok((Self { doc, font }, first_layer))
    }

    fn add_page(&self) -> PdfLayerReference {
        let (page, layer) = self
            .doc
            .add_page(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "Layer 1");
        self.doc.get_page(page).get_layer(layer)
    }
}

// PDF y runs bottom-up; the layout above is written top-down.
fn y_from_top(mm: f32) -> Mm {
    Mm(PAGE_HEIGHT_MM - mm)
}

fn draw_plot_page(layer: &PdfLayerReference, font: &IndirectFontRef, plot: &Plot, preview: Preview) {
    layer.use_text(
        format!("Talhão: {}", plot.name),
        TITLE_FONT_SIZE,
        Mm(LEFT_MARGIN_MM),
        y_from_top(TITLE_TOP_MM),
        font,
    );

    embed_preview(layer, preview);

    layer.use_text(
        format!("Cultura: {}", plot.crop),
        BODY_FONT_SIZE,
        Mm(LEFT_MARGIN_MM),
        y_from_top(CROP_TOP_MM),
        font,
    );
    layer.use_text(
        format!("Área: {} ha", format_area(plot.area)),
        BODY_FONT_SIZE,
        Mm(LEFT_MARGIN_MM),
        y_from_top(AREA_TOP_MM),
        font,
    );
    if let Some(notes) = plot.notes.as_deref().filter(|n| !n.trim().is_empty()) {
        layer.use_text(
            format!("Obs: {notes}"),
            BODY_FONT_SIZE,
            Mm(LEFT_MARGIN_MM),
            y_from_top(NOTES_TOP_MM),
            font,
        );
    }

    let generated = chrono::Local::now().format("%d/%m/%Y %H:%M");
    layer.use_text(
        format!("Gerado em {generated}"),
        FOOTER_FONT_SIZE,
        Mm(LEFT_MARGIN_MM),
        Mm(FOOTER_BOTTOM_MM),
        font,
    );
}

fn embed_preview(layer: &PdfLayerReference, preview: Preview) {
    let (width_px, height_px) = preview.image.dimensions();
    let rgb = DynamicImage::ImageRgba8(preview.image).to_rgb8();

    let pdf_image = Image::from(ImageXObject {
        width: Px(width_px as usize),
        height: Px(height_px as usize),
        color_space: ColorSpace::Rgb,
        bits_per_component: ColorBits::Bit8,
        interpolate: true,
        image_data: rgb.into_raw(),
        image_filter: None,
        clipping_bbox: None,
        smask: None,
    });

    // Stretch the bitmap into the fixed frame regardless of its aspect.
    let native_width_mm = width_px as f32 * 25.4 / PREVIEW_DPI;
    let native_height_mm = height_px as f32 * 25.4 / PREVIEW_DPI;
    pdf_image.add_to_layer(
        layer.clone(),
        ImageTransform {
            translate_x: Some(Mm(LEFT_MARGIN_MM)),
            translate_y: Some(y_from_top(IMAGE_TOP_MM + IMAGE_HEIGHT_MM)),
            scale_x: Some(IMAGE_WIDTH_MM / native_width_mm),
            scale_y: Some(IMAGE_HEIGHT_MM / native_height_mm),
            dpi: Some(PREVIEW_DPI),
            ..Default::default()
        },
    );
}

/// Areas print the way the capture form stored them: `2` stays `2`, never
/// `2.00`.
fn format_area(area: f64) -> String {
    area.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::testing::{FailFetcher, SolidFetcher, StallFetcher};
    use crate::types::LatLng;
    use ::image::Rgba;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.preview.width = 64;
        config.preview.height = 64;
        config.preview.zoom = 2;
        config.tiles.fetch_timeout_ms = 25;
        config
    }

    fn square_plot(id: u64, name: &str) -> Plot {
        Plot {
            id,
            name: name.to_string(),
            crop: "Milho".to_string(),
            area: 1.21,
            notes: Some("Perto da sede".to_string()),
            coordinates: vec![
                LatLng { lat: 0.0, lng: 0.0 },
                LatLng { lat: 0.0, lng: 0.001 },
                LatLng {
                    lat: 0.001,
                    lng: 0.001,
                },
                LatLng {
                    lat: 0.001,
                    lng: 0.0,
                },
            ],
        }
    }

    #[tokio::test]
    async fn empty_store_is_refused() {
        let err = export_pdf(&[], &test_config(), &FailFetcher).await;
        assert!(matches!(err, Err(ExportError::NoPlots)));
    }

    #[tokio::test]
    async fn one_page_per_plot() {
        let plots = vec![square_plot(1, "Fundo"), square_plot(2, "Encosta")];
        let outcome = export_pdf(
            &plots,
            &test_config(),
            &SolidFetcher(Rgba([40, 40, 40, 255])),
        )
        .await
        .unwrap();

        assert_eq!(outcome.pages, 2);
        assert!(outcome.warnings.is_empty());
        assert!(outcome.pdf.starts_with(b"%PDF"));
    }

    // Spawning moves the export onto a worker thread, which is how the HTTP
    // handler runs it; this does not compile unless the future is Send.
    #[tokio::test]
    async fn export_runs_on_a_spawned_task() {
        let plots = vec![square_plot(1, "Fundo")];
        let outcome = tokio::spawn(async move {
            export_pdf(
                &plots,
                &test_config(),
                &SolidFetcher(Rgba([40, 40, 40, 255])),
            )
            .await
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(outcome.pages, 1);
        assert!(outcome.pdf.starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn stalled_tile_server_degrades_but_still_exports() {
        let plots = vec![square_plot(1, "Fundo"), square_plot(2, "Encosta")];
        let outcome = export_pdf(&plots, &test_config(), &StallFetcher)
            .await
            .unwrap();

        assert_eq!(outcome.pages, 2);
        assert_eq!(outcome.warnings.len(), 2);
        assert!(outcome.warnings[0].contains("map tiles failed"));
        assert!(outcome.pdf.starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn bad_boundary_skips_its_page_with_a_warning() {
        let mut broken = square_plot(1, "Quebrado");
        broken.coordinates.truncate(2);
        let plots = vec![broken, square_plot(2, "Inteiro")];
        let outcome = export_pdf(
            &plots,
            &test_config(),
            &SolidFetcher(Rgba([40, 40, 40, 255])),
        )
        .await
        .unwrap();

        assert_eq!(outcome.pages, 1);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("Quebrado"));
    }

    #[tokio::test]
    async fn report_with_every_page_skipped_is_an_error() {
        let mut broken = square_plot(1, "Quebrado");
        broken.coordinates.truncate(2);
        let err = export_pdf(
            &[broken],
            &test_config(),
            &SolidFetcher(Rgba([40, 40, 40, 255])),
        )
        .await;

        match err {
            Err(ExportError::NothingRendered(msg)) => assert!(msg.contains("Quebrado")),
            Err(other) => panic!("expected NothingRendered, got {other:?}"),
            Ok(_) => panic!("expected NothingRendered, got a document"),
        }
    }

    #[test]
    fn areas_print_without_trailing_zeros() {
        assert_eq!(format_area(2.0), "2");
        assert_eq!(format_area(12.5), "12.5");
        assert_eq!(format_area(12.34), "12.34");
    }
}
