//! Descriptor matching: acceptance predicates and the two search
//! directions.
//!
//! Inverted search runs every scene descriptor against the object
//! vocabulary and fans matches out through `word_to_objects`. Direct
//! search runs object descriptors against a per-frame scene index and
//! recovers the owning object through the registry's row ranges. Both
//! apply the same acceptance chain: the NNDR ratio test when enabled,
//! then the absolute-distance test when enabled, else the bare nearest
//! neighbor.

use crate::core::{DescriptorMatrix, MultiMap, ObjectId, WordId};
use crate::detection::{DetectionInfo, MatchTable};
use crate::objects::ObjectRegistry;
use crate::settings::{NearestNeighborSettings, Settings};
use crate::vocabulary::Vocabulary;
use crate::workers::run_waves;

/// Word id to scene keypoint indices of the current frame (direct mode).
pub type SceneWords = MultiMap<WordId, u32>;

/// The nearest-neighbor acceptance chain.
///
/// `d1` is the second-nearest distance; infinite when only one neighbor
/// exists, so a sole candidate passes the ratio test.
pub fn accept(d0: f32, d1: f32, nn: &NearestNeighborSettings) -> bool {
    let mut matched = false;
    if nn.nndr_ratio_used && d0 <= nn.nndr_ratio * d1 {
        matched = true;
    }
    if (matched || !nn.nndr_ratio_used) && nn.min_distance_used {
        matched = d0 <= nn.min_distance;
    }
    if !matched && !nn.nndr_ratio_used && !nn.min_distance_used {
        // no criterion configured: take the nearest descriptor
        matched = true;
    }
    matched
}

/// Single-threaded matching for both directions.
///
/// In inverted mode the scene descriptors query the object vocabulary;
/// in direct mode the concatenated object matrix queries the scene
/// vocabulary and `scene_words` carries the frame's word table.
pub fn serial_search(
    vocabulary: &Vocabulary,
    registry: &ObjectRegistry,
    scene_descriptors: &DescriptorMatrix,
    scene_words: &SceneWords,
    settings: &Settings,
    info: &mut DetectionInfo,
) {
    let k = settings.knn_k();
    let inverted = settings.general.inverted_search;

    let results = if inverted {
        vocabulary.search(scene_descriptors, k)
    } else {
        let Some(objects) = registry.concatenated_descriptors() else {
            return;
        };
        vocabulary.search(objects, k)
    };

    for i in 0..results.rows() {
        let idx0 = results.index(i, 0);
        if idx0 < 0 {
            continue;
        }
        let d0 = results.distance(i, 0);
        let d1 = if k > 1 {
            results.distance(i, 1)
        } else {
            f32::INFINITY
        };
        info.fold_matched_distance(d0);
        if !accept(d0, d1, &settings.nearest_neighbor) {
            continue;
        }

        let word_id = idx0 as WordId;
        if inverted {
            emit_inverted(vocabulary, registry, word_id, i as u32, info);
        } else if let Some((object_id, local_row)) = registry.object_for_row(i) {
            if scene_words.count_key(&word_id) == 1 {
                if let Some(&scene_idx) = scene_words.first(&word_id) {
                    info.matches
                        .entry(object_id)
                        .or_default()
                        .insert(local_row as u32, scene_idx);
                }
            }
        }
    }
}

/// Scene row `scene_idx` matched `word_id`: emit one pair per object the
/// word uniquely witnesses.
fn emit_inverted(
    vocabulary: &Vocabulary,
    registry: &ObjectRegistry,
    word_id: WordId,
    scene_idx: u32,
    info: &mut DetectionInfo,
) {
    for &object_id in vocabulary.word_to_objects().get(&word_id) {
        // a word seen several times in one object is ambiguous there
        if vocabulary.word_to_objects().count_pair(&word_id, &object_id) != 1 {
            continue;
        }
        let Some(sig) = registry.get(object_id) else {
            continue;
        };
        if let Some(&obj_kpt) = sig.words().first(&word_id) {
            info.matches
                .entry(object_id)
                .or_default()
                .insert(obj_kpt, scene_idx);
        }
    }
}

/// Direct-mode matching with one worker per object per wave.
///
/// The scene index is read-only after its build, so workers query a
/// shared vocabulary concurrently; each returns its own match table and
/// local distance extrema, folded in join order.
pub fn parallel_direct_search(
    vocabulary: &Vocabulary,
    registry: &ObjectRegistry,
    scene_words: &SceneWords,
    settings: &Settings,
    info: &mut DetectionInfo,
) {
    let k = settings.knn_k();
    let tasks: Vec<(ObjectId, &DescriptorMatrix)> = registry
        .descriptor_matrices()
        .iter()
        .map(|(id, m)| (*id, m))
        .collect();

    let outputs = run_waves(tasks, settings.general.threads, |(object_id, descriptors)| {
        let mut matches = MatchTable::new();
        let mut min = -1.0f32;
        let mut max = -1.0f32;
        if descriptors.is_empty() {
            return (object_id, matches, min, max);
        }
        let results = vocabulary.search(descriptors, k);
        for i in 0..results.rows() {
            let idx0 = results.index(i, 0);
            if idx0 < 0 {
                continue;
            }
            let d0 = results.distance(i, 0);
            let d1 = if k > 1 {
                results.distance(i, 1)
            } else {
                f32::INFINITY
            };
            if min == -1.0 || min > d0 {
                min = d0;
            }
            if max == -1.0 || max < d0 {
                max = d0;
            }
            if !accept(d0, d1, &settings.nearest_neighbor) {
                continue;
            }
            let word_id = idx0 as WordId;
            if scene_words.count_key(&word_id) == 1 {
                if let Some(&scene_idx) = scene_words.first(&word_id) {
                    matches.insert(i as u32, scene_idx);
                }
            }
        }
        (object_id, matches, min, max)
    });

    for (object_id, matches, min, max) in outputs {
        info.matches.insert(object_id, matches);
        if min >= 0.0 {
            info.fold_matched_distance(min);
        }
        if max >= 0.0 {
            info.fold_matched_distance(max);
        }
    }
}
