use image::{Rgba, RgbaImage};
use serde_json::json;

use shelf_overlay::detect::parse_response;
use shelf_overlay::{
    AnnotationStyle, AnnotationView, Annotator, DetectionProvider, LabelRasterizer, SourceImage,
    StubProvider,
};

fn white(width: u32, height: u32) -> SourceImage {
    SourceImage::from_rgba(RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255])))
}

fn annotator() -> Annotator {
    Annotator::new(AnnotationStyle::default(), LabelRasterizer::system_default())
}

#[test]
fn single_missing_detection_draws_box_and_label() {
    let batch = parse_response(&json!({
        "predictions": [
            { "class": "missing", "x": 100, "y": 100, "width": 40, "height": 20, "confidence": 0.85 }
        ]
    }))
    .expect("parse");
    let out = annotator().draw(&white(200, 200), &batch.records);

    assert_eq!(out.dimensions(), (200, 200));
    assert_eq!(out.overlays.len(), 1);
    let overlay = &out.overlays[0];
    assert_eq!(overlay.top_left, (80.0, 90.0));
    assert_eq!(overlay.bottom_right(), (120.0, 110.0));
    assert_eq!(overlay.label, "85%");
    assert_eq!(overlay.label_anchor, (100.0, 85.0));

    // The stroke is centered on the rectangle edge.
    assert_eq!(*out.image.get_pixel(80, 100), Rgba([255, 0, 0, 255]));
    assert_eq!(*out.image.get_pixel(100, 110), Rgba([255, 0, 0, 255]));
    // Interior and far corners stay untouched.
    assert_eq!(*out.image.get_pixel(100, 100), Rgba([255, 255, 255, 255]));
    assert_eq!(*out.image.get_pixel(199, 199), Rgba([255, 255, 255, 255]));
}

#[test]
fn output_matches_source_dimensions_for_any_list() {
    let annotator = annotator();
    let source = white(123, 77);
    let batch = parse_response(&json!([
        { "class": "missing", "x": 0, "y": 0, "width": 300, "height": 300, "confidence": 0.5 },
        { "class": "missing", "x": 500, "y": -40, "width": 10, "height": 10, "confidence": 0.2 }
    ]))
    .expect("parse");

    assert_eq!(annotator.draw(&source, &[]).dimensions(), (123, 77));
    assert_eq!(annotator.draw(&source, &batch.records).dimensions(), (123, 77));
}

#[test]
fn malformed_records_are_excluded_without_error() {
    let batch = parse_response(&json!({
        "predictions": [
            { "class": "missing", "x": 50, "y": 50, "width": 0, "height": 20, "confidence": 0.9 },
            { "class": "missing", "x": 50, "y": 50, "width": 20, "height": 20, "confidence": 1.5 },
            { "class": "missing", "x": 150, "y": 150, "width": 20, "height": 20, "confidence": 0.7 }
        ]
    }))
    .expect("parse");
    assert_eq!(batch.dropped, 2);
    assert_eq!(batch.len(), 1);

    let out = annotator().draw(&white(200, 200), &batch.records);
    assert_eq!(out.overlays.len(), 1);
    assert_eq!(out.overlays[0].top_left, (140.0, 140.0));
    assert_eq!(out.overlays[0].label, "70%");
}

#[test]
fn other_classes_never_produce_boxes() {
    let batch = parse_response(&json!([
        { "class": "product", "x": 100, "y": 100, "width": 40, "height": 20, "confidence": 0.99 },
        { "class": "Missing", "x": 100, "y": 100, "width": 40, "height": 20, "confidence": 0.99 }
    ]))
    .expect("parse");
    let source = white(200, 200);
    let out = annotator().draw(&source, &batch.records);
    assert!(out.overlays.is_empty());
    assert_eq!(out.image, *source.image());
}

#[test]
fn empty_update_clears_previous_overlays() {
    let mut view = AnnotationView::new(annotator());
    view.set_source(white(200, 200));
    let batch = parse_response(&json!([
        { "class": "missing", "x": 100, "y": 100, "width": 40, "height": 20, "confidence": 0.85 }
    ]))
    .expect("parse");
    view.set_detections(batch.records);
    assert_eq!(view.output().map(|o| o.overlays.len()), Some(1));

    view.set_detections(Vec::new());
    let cleared = view.output().expect("redrawn");
    assert!(cleared.overlays.is_empty());
    assert!(cleared.image.pixels().all(|p| *p == Rgba([255, 255, 255, 255])));
}

#[test]
fn stub_provider_feeds_the_annotator() {
    let mut provider = StubProvider::new(json!({
        "predictions": [
            { "class": "missing", "x": 30, "y": 30, "width": 10, "height": 10, "confidence": 0.6 }
        ],
        "image": { "width": 64, "height": 64 }
    }));
    let png = {
        let mut bytes = std::io::Cursor::new(Vec::new());
        white(64, 64)
            .image()
            .write_to(&mut bytes, image::ImageFormat::Png)
            .expect("encode");
        bytes.into_inner()
    };
    let batch = provider.detect_batch(&png).expect("detect");
    assert_eq!(batch.image_size, Some((64, 64)));

    let source = SourceImage::decode(&png).expect("decode");
    let out = annotator().draw(&source, &batch.records);
    assert_eq!(out.overlays.len(), 1);
    assert_eq!(out.overlays[0].top_left, (25.0, 25.0));

    let encoded = out.encode_png().expect("png");
    let reloaded = SourceImage::decode(&encoded).expect("reload");
    assert_eq!(reloaded.dimensions(), (64, 64));
}
