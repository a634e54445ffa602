use std::sync::{Arc, RwLock};

use log::warn;

use lodestar_gltf::document::types::{Interpolation, TargetPath};

use crate::LoaderError;
use crate::engine::{
    AnimationGroup, AnimationTrack, KeyInterpolation, Keyframe, TrackTarget, TrackValue,
};
use crate::extensions::Stage;
use crate::resolve::AccessorData;
use crate::session::LoadSession;

impl LoadSession {
    pub async fn resolve_animation(&self, index: usize) -> Result<Arc<AnimationGroup>, LoaderError> {
        let key = index as u64;
        if let Some(hit) = self.caches.animations.peek(key) {
            return hit;
        }
        if let Some(claimed) = self
            .apply_extensions(Stage::Animation, key, |ext, ctx| {
                ext.load_animation(ctx, index)
            })
            .await?
        {
            self.caches
                .animations
                .store_if_vacant(key, Ok(claimed.clone()));
            self.record_animation(claimed.clone());
            return Ok(claimed);
        }
        self.caches
            .animations
            .get_or_resolve(key, Box::pin(self.load_animation_default(index)))
            .await
    }

    async fn load_animation_default(
        &self,
        index: usize,
    ) -> Result<Arc<AnimationGroup>, LoaderError> {
        self.check_disposed()?;
        let animation = self.graph().animation(index)?;
        let path = format!("/animations/{}", index);

        // Cubic-spline tangents arrive in value units per second; keyframe
        // evaluation works in frames.
        let tangent_scale = 1.0 / self.options.target_fps;

        let mut tracks = Vec::new();
        for (c, channel) in animation.channels.iter().enumerate() {
            let channel_path = format!("{}/channels/{}", path, c);
            let sampler = animation.samplers.get(channel.sampler).ok_or_else(|| {
                LoaderError::reference(&channel_path, "no such animation sampler")
            })?;
            let Some(node) = channel.target.node else {
                warn!("{}: channel without a target node, skipping", channel_path);
                continue;
            };

            let (input, output) = tokio::try_join!(
                self.resolve_accessor(sampler.input),
                self.resolve_accessor(sampler.output),
            )?;
            let interpolation = match sampler.interpolation {
                Interpolation::Step => KeyInterpolation::Step,
                Interpolation::Linear => KeyInterpolation::Linear,
                Interpolation::Cubicspline => KeyInterpolation::CubicSpline,
            };

            match channel.target.path {
                TargetPath::Translation => tracks.push(transform_track(
                    TrackTarget::Translation { node },
                    &input,
                    &output,
                    interpolation,
                    tangent_scale,
                    &channel_path,
                )?),
                TargetPath::Rotation => tracks.push(transform_track(
                    TrackTarget::Rotation { node },
                    &input,
                    &output,
                    interpolation,
                    tangent_scale,
                    &channel_path,
                )?),
                TargetPath::Scale => tracks.push(transform_track(
                    TrackTarget::Scale { node },
                    &input,
                    &output,
                    interpolation,
                    tangent_scale,
                    &channel_path,
                )?),
                TargetPath::Weights => {
                    let Some(target_count) = self.morph_target_count(node) else {
                        warn!(
                            "{}: weights channel on a node without morph targets, skipping",
                            channel_path
                        );
                        continue;
                    };
                    tracks.extend(weight_tracks(
                        node,
                        target_count,
                        &input,
                        &output,
                        interpolation,
                        tangent_scale,
                        &channel_path,
                    )?);
                }
            }
        }

        let group = Arc::new(AnimationGroup {
            name: animation
                .name
                .clone()
                .unwrap_or_else(|| format!("animation_{}", index)),
            tracks,
            playing: RwLock::new(false),
        });
        self.record_animation(group.clone());
        self.counters.animations_resolved();
        Ok(group)
    }

    fn morph_target_count(&self, node: usize) -> Option<usize> {
        let mesh = self.graph().node(node).ok()?.mesh?;
        let count = self
            .graph()
            .mesh(mesh)
            .ok()?
            .primitives
            .first()?
            .targets
            .len();
        (count > 0).then_some(count)
    }
}

fn track_value(output: &AccessorData, element: usize, rotation: bool) -> TrackValue {
    if rotation {
        TrackValue::Rotation(output.quat(element))
    } else {
        TrackValue::Vector(output.vec3(element))
    }
}

fn transform_track(
    target: TrackTarget,
    input: &AccessorData,
    output: &AccessorData,
    interpolation: KeyInterpolation,
    tangent_scale: f32,
    path: &str,
) -> Result<AnimationTrack, LoaderError> {
    let rotation = matches!(target, TrackTarget::Rotation { .. });
    output.ensure_components(if rotation { 4 } else { 3 }, path)?;
    let cubic = interpolation == KeyInterpolation::CubicSpline;
    let expected = input.count * if cubic { 3 } else { 1 };
    if output.count != expected {
        return Err(LoaderError::reference(
            path,
            format!(
                "sampler output holds {} elements, {} keys need {}",
                output.count, input.count, expected
            ),
        ));
    }

    let mut keys = Vec::with_capacity(input.count);
    for k in 0..input.count {
        let time = input.scalar(k);
        if cubic {
            // Per key the output carries in-tangent, value, out-tangent.
            keys.push(Keyframe {
                time,
                value: track_value(output, k * 3 + 1, rotation),
                in_tangent: Some(scale_value(track_value(output, k * 3, rotation), tangent_scale)),
                out_tangent: Some(scale_value(
                    track_value(output, k * 3 + 2, rotation),
                    tangent_scale,
                )),
            });
        } else {
            keys.push(Keyframe {
                time,
                value: track_value(output, k, rotation),
                in_tangent: None,
                out_tangent: None,
            });
        }
    }

    Ok(AnimationTrack {
        target,
        interpolation,
        keys,
    })
}

/// A weights channel fans out into one scalar track per morph target.
fn weight_tracks(
    node: usize,
    target_count: usize,
    input: &AccessorData,
    output: &AccessorData,
    interpolation: KeyInterpolation,
    tangent_scale: f32,
    path: &str,
) -> Result<Vec<AnimationTrack>, LoaderError> {
    let cubic = interpolation == KeyInterpolation::CubicSpline;
    let expected = input.count * target_count * if cubic { 3 } else { 1 };
    if output.count != expected {
        return Err(LoaderError::reference(
            path,
            format!(
                "sampler output holds {} weights, {} keys x {} targets need {}",
                output.count, input.count, target_count, expected
            ),
        ));
    }

    let mut tracks = Vec::with_capacity(target_count);
    for target in 0..target_count {
        let mut keys = Vec::with_capacity(input.count);
        for k in 0..input.count {
            let time = input.scalar(k);
            if cubic {
                // Per key: all in-tangents, then all values, then all
                // out-tangents, each a run of target_count scalars.
                let base = k * 3 * target_count;
                keys.push(Keyframe {
                    time,
                    value: TrackValue::Scalar(output.scalar(base + target_count + target)),
                    in_tangent: Some(TrackValue::Scalar(
                        output.scalar(base + target) * tangent_scale,
                    )),
                    out_tangent: Some(TrackValue::Scalar(
                        output.scalar(base + 2 * target_count + target) * tangent_scale,
                    )),
                });
            } else {
                keys.push(Keyframe {
                    time,
                    value: TrackValue::Scalar(output.scalar(k * target_count + target)),
                    in_tangent: None,
                    out_tangent: None,
                });
            }
        }
        tracks.push(AnimationTrack {
            target: TrackTarget::MorphWeight { node, target },
            interpolation,
            keys,
        });
    }
    Ok(tracks)
}

fn scale_value(value: TrackValue, scale: f32) -> TrackValue {
    match value {
        TrackValue::Scalar(v) => TrackValue::Scalar(v * scale),
        TrackValue::Vector(v) => TrackValue::Vector(v * scale),
        TrackValue::Rotation(q) => {
            TrackValue::Rotation(glam::Quat::from_vec4(glam::Vec4::from(q) * scale))
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::{KeyInterpolation, TrackTarget, TrackValue};
    use crate::resolve::AccessorData;

    use super::{transform_track, weight_tracks};

    fn scalars(values: Vec<f32>) -> AccessorData {
        AccessorData {
            components: 1,
            count: values.len(),
            values,
        }
    }

    fn vec3s(values: Vec<f32>) -> AccessorData {
        AccessorData {
            components: 3,
            count: values.len() / 3,
            values,
        }
    }

    #[test]
    fn linear_track_pairs_times_and_values() {
        let input = scalars(vec![0.0, 0.5]);
        let output = vec3s(vec![0.0, 0.0, 0.0, 1.0, 2.0, 3.0]);
        let track = transform_track(
            TrackTarget::Translation { node: 7 },
            &input,
            &output,
            KeyInterpolation::Linear,
            1.0 / 60.0,
            "/animations/0/channels/0",
        )
        .expect("track");
        assert_eq!(track.keys.len(), 2);
        assert_eq!(track.keys[1].time, 0.5);
        assert_eq!(
            track.keys[1].value,
            TrackValue::Vector(glam::Vec3::new(1.0, 2.0, 3.0))
        );
        assert!(track.keys[1].in_tangent.is_none());
    }

    #[test]
    fn cubic_track_scales_tangents() {
        let input = scalars(vec![0.0]);
        // in-tangent, value, out-tangent of the single key.
        let output = vec3s(vec![60.0, 0.0, 0.0, 1.0, 1.0, 1.0, 120.0, 0.0, 0.0]);
        let track = transform_track(
            TrackTarget::Scale { node: 0 },
            &input,
            &output,
            KeyInterpolation::CubicSpline,
            1.0 / 60.0,
            "/animations/0/channels/0",
        )
        .expect("track");
        assert_eq!(
            track.keys[0].in_tangent,
            Some(TrackValue::Vector(glam::Vec3::new(1.0, 0.0, 0.0)))
        );
        assert_eq!(
            track.keys[0].out_tangent,
            Some(TrackValue::Vector(glam::Vec3::new(2.0, 0.0, 0.0)))
        );
    }

    #[test]
    fn weights_fan_out_one_track_per_target() {
        let input = scalars(vec![0.0, 1.0, 2.0]);
        // Two targets, three keys, linear: key-major scalar runs.
        let output = scalars(vec![0.1, 0.9, 0.2, 0.8, 0.3, 0.7]);
        let tracks = weight_tracks(
            4,
            2,
            &input,
            &output,
            KeyInterpolation::Linear,
            1.0 / 60.0,
            "/animations/0/channels/0",
        )
        .expect("tracks");
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].target, TrackTarget::MorphWeight { node: 4, target: 0 });
        assert_eq!(tracks[0].keys.len(), 3);
        assert_eq!(tracks[0].keys[2].value, TrackValue::Scalar(0.3));
        assert_eq!(tracks[1].keys[0].value, TrackValue::Scalar(0.9));
    }

    #[test]
    fn rotation_track_refuses_three_component_output() {
        let input = scalars(vec![0.0, 1.0]);
        let output = vec3s(vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let error = transform_track(
            TrackTarget::Rotation { node: 0 },
            &input,
            &output,
            KeyInterpolation::Linear,
            1.0 / 60.0,
            "/animations/0/channels/0",
        )
        .expect_err("rotations need four components");
        assert!(matches!(error, crate::LoaderError::Reference { .. }));
    }

    #[test]
    fn output_count_mismatch_is_a_reference_error() {
        let input = scalars(vec![0.0, 1.0]);
        let output = vec3s(vec![0.0, 0.0, 0.0]);
        assert!(
            transform_track(
                TrackTarget::Translation { node: 0 },
                &input,
                &output,
                KeyInterpolation::Linear,
                1.0 / 60.0,
                "/animations/0/channels/0",
            )
            .is_err()
        );
    }
}
