//! End-to-end detection scenarios with synthetic feature operators.

mod common;

use common::{engine, object_image, paste, test_settings, MarkerDetector, MarkerExtractor};
use image::GrayImage;

use find_object::geometry::project_corners;
use find_object::{FindObject, RejectedCode};

const OBJ_W: u32 = 64;
const OBJ_H: u32 = 64;
const MARKERS: usize = 25;

fn registered_engine(seed: u64) -> FindObject {
    let mut eng = engine(test_settings());
    eng.add_object(object_image(seed, OBJ_W, OBJ_H, MARKERS), 1, "1.png")
        .unwrap();
    eng.update_objects();
    eng.update_vocabulary();
    eng
}

#[test]
fn empty_registry_is_a_success_with_no_detections() {
    let eng = engine(test_settings());
    let mut scene = GrayImage::new(320, 240);
    paste(&mut scene, &object_image(5, OBJ_W, OBJ_H, MARKERS), 10, 10);

    let info = eng.detect_gray(&scene);
    assert!(info.success);
    assert!(info.detections.is_empty());
    assert!(info.matches.is_empty());
}

#[test]
fn empty_scene_is_a_success() {
    let eng = registered_engine(7);
    let info = eng.detect_gray(&GrayImage::new(320, 240));
    assert!(info.success);
    assert!(info.scene_keypoints.is_empty());
    assert!(info.detections.is_empty());
}

#[test]
fn translated_patch_is_detected_within_two_pixels() {
    let eng = registered_engine(7);

    let (tx, ty) = (40u32, 30u32);
    let mut scene = GrayImage::new(320, 240);
    paste(&mut scene, &object_image(7, OBJ_W, OBJ_H, MARKERS), tx, ty);

    let info = eng.detect_gray(&scene);
    assert!(info.success);
    assert_eq!(info.detections.len(), 1);

    let detection = &info.detections[0];
    assert_eq!(detection.object_id, 1);
    assert_eq!(detection.object_size, (OBJ_W, OBJ_H));
    assert!(detection.inliers.len() >= MARKERS - 2);

    // every object corner must land within 2 px of the pasted corner
    let corners = project_corners(&detection.homography, (OBJ_W, OBJ_H)).unwrap();
    let expected = [
        (tx as f64, ty as f64),
        ((tx + OBJ_W) as f64, ty as f64),
        ((tx + OBJ_W) as f64, (ty + OBJ_H) as f64),
        (tx as f64, (ty + OBJ_H) as f64),
    ];
    for (corner, (ex, ey)) in corners.iter().zip(expected) {
        assert!(
            (corner.x - ex).abs() < 2.0 && (corner.y - ey).abs() < 2.0,
            "corner {corner:?} too far from ({ex}, {ey})"
        );
    }

    // exact copies match at distance zero
    assert_eq!(info.min_matched_distance, 0.0);
    assert!(info.rejections.is_empty());
}

#[test]
fn two_distant_instances_are_both_detected() {
    let mut settings = test_settings();
    settings.general.multi_detection = true;
    let mut eng = engine(settings);
    eng.add_object(object_image(11, OBJ_W, OBJ_H, MARKERS), 1, "1.png")
        .unwrap();
    eng.update_objects();
    eng.update_vocabulary();

    let patch = object_image(11, OBJ_W, OBJ_H, MARKERS);
    let mut scene = GrayImage::new(320, 240);
    paste(&mut scene, &patch, 20, 20);
    paste(&mut scene, &patch, 180, 100);

    let info = eng.detect_gray(&scene);
    assert!(info.success);
    assert_eq!(info.detections.len(), 2);

    let mut translations: Vec<(f64, f64)> = info
        .detections
        .iter()
        .map(|d| (d.homography[(0, 2)], d.homography[(1, 2)]))
        .collect();
    translations.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
    assert!((translations[0].0 - 20.0).abs() < 2.0 && (translations[0].1 - 20.0).abs() < 2.0);
    assert!((translations[1].0 - 180.0).abs() < 2.0 && (translations[1].1 - 100.0).abs() < 2.0);

    // the drained outlier queue ends in a LowMatches rejection
    assert!(info
        .rejections
        .iter()
        .any(|r| r.code == RejectedCode::LowMatches));
}

#[test]
fn close_second_instance_is_rejected_as_superposed() {
    let mut settings = test_settings();
    settings.general.multi_detection = true;
    settings.general.multi_detection_radius = 200.0;
    let mut eng = engine(settings);
    eng.add_object(object_image(13, OBJ_W, OBJ_H, MARKERS), 1, "1.png")
        .unwrap();
    eng.update_objects();
    eng.update_vocabulary();

    let patch = object_image(13, OBJ_W, OBJ_H, MARKERS);
    let mut scene = GrayImage::new(320, 240);
    paste(&mut scene, &patch, 20, 20);
    paste(&mut scene, &patch, 120, 20); // 100 px apart, inside the radius

    let info = eng.detect_gray(&scene);
    assert!(info.success);
    assert_eq!(info.detections.len(), 1);
    assert!(info
        .rejections
        .iter()
        .any(|r| r.object_id == 1 && r.code == RejectedCode::Superposed));
}

#[test]
fn descriptor_type_mismatch_fails_without_detections() {
    let mut eng = FindObject::new(
        test_settings(),
        Box::new(MarkerDetector),
        // objects (64 px wide) get u8 patches, the 320 px scene gets f32
        Box::new(MarkerExtractor {
            float_above_width: Some(300),
        }),
    );
    eng.add_object(object_image(17, OBJ_W, OBJ_H, MARKERS), 1, "1.png")
        .unwrap();
    eng.update_objects();
    eng.update_vocabulary();

    let mut scene = GrayImage::new(320, 240);
    paste(&mut scene, &object_image(17, OBJ_W, OBJ_H, MARKERS), 40, 30);

    let info = eng.detect_gray(&scene);
    assert!(!info.success);
    assert!(info.detections.is_empty());
    assert!(info.matches.is_empty());
}

#[test]
fn direct_mode_detects_the_same_patch() {
    let mut settings = test_settings();
    settings.general.inverted_search = false;
    let mut eng = engine(settings);
    eng.add_object(object_image(19, OBJ_W, OBJ_H, MARKERS), 1, "1.png")
        .unwrap();
    eng.update_objects();
    eng.update_vocabulary();

    let mut scene = GrayImage::new(320, 240);
    paste(&mut scene, &object_image(19, OBJ_W, OBJ_H, MARKERS), 55, 45);

    let info = eng.detect_gray(&scene);
    assert!(info.success);
    assert_eq!(info.detections.len(), 1);
    let h = &info.detections[0].homography;
    assert!((h[(0, 2)] - 55.0).abs() < 2.0);
    assert!((h[(1, 2)] - 45.0).abs() < 2.0);
}

#[test]
fn direct_mode_parallel_matches_serial() {
    let build = |threads: usize| {
        let mut settings = test_settings();
        settings.general.inverted_search = false;
        settings.general.threads = threads;
        let mut eng = engine(settings);
        for (i, seed) in [23u64, 29].iter().enumerate() {
            eng.add_object(
                object_image(*seed, OBJ_W, OBJ_H, MARKERS),
                (i + 1) as u32,
                format!("{}.png", i + 1),
            )
            .unwrap();
        }
        eng.update_objects();
        eng.update_vocabulary();
        eng
    };

    let mut scene = GrayImage::new(400, 240);
    paste(&mut scene, &object_image(23, OBJ_W, OBJ_H, MARKERS), 10, 30);
    paste(&mut scene, &object_image(29, OBJ_W, OBJ_H, MARKERS), 300, 120);

    let serial = build(1).detect_gray(&scene);
    let parallel = build(3).detect_gray(&scene);

    assert!(serial.success && parallel.success);
    assert_eq!(serial.matches, parallel.matches);
    assert_eq!(serial.detections.len(), 2);
    assert_eq!(parallel.detections.len(), 2);
    assert_eq!(
        serial.detected_objects(),
        parallel.detected_objects()
    );
}

#[test]
fn detection_events_are_published() {
    let eng = registered_engine(31);
    let receiver = eng.subscribe();

    let mut scene = GrayImage::new(320, 240);
    paste(&mut scene, &object_image(31, OBJ_W, OBJ_H, MARKERS), 30, 30);
    let scene = image::DynamicImage::ImageLuma8(scene);

    eng.detect_and_emit(&scene);
    let event = receiver.try_recv().expect("detection event");
    assert_eq!(event.detections.len(), 1);

    // nothing found and no-detection events disabled: no event
    eng.detect_and_emit(&image::DynamicImage::ImageLuma8(GrayImage::new(64, 64)));
    assert!(receiver.try_recv().is_err());
}

#[test]
fn timings_are_recorded() {
    let eng = registered_engine(37);
    let mut scene = GrayImage::new(320, 240);
    paste(&mut scene, &object_image(37, OBJ_W, OBJ_H, MARKERS), 40, 30);

    let info = eng.detect_gray(&scene);
    assert!(info.timings.total >= info.timings.matching);
    assert!(info.timings.total > std::time::Duration::ZERO);
}
