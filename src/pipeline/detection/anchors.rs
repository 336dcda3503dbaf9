use crate::shapes::point::PointF32;

pub const NUM_ANCHORS: usize = 896;

// SSD anchor options for the short range BlazeFace model
const INPUT_SIZE: u32 = 128;
const STRIDES: [u32; 4] = [8, 16, 16, 16];
// one aspect ratio plus the interpolated scale
const ANCHORS_PER_LAYER: usize = 2;
const ANCHOR_OFFSET: f32 = 0.5;

/// Anchor centers in normalized input space. The model uses fixed size
/// anchors, so width and height are always 1.
pub fn gen_anchors() -> Vec<PointF32> {
    let mut anchors = Vec::with_capacity(NUM_ANCHORS);

    let mut layer_id = 0;
    while layer_id < STRIDES.len() {
        // consecutive layers sharing a stride are merged into one grid
        let mut last_same_stride_layer = layer_id;
        let mut anchors_per_cell = 0;
        while last_same_stride_layer < STRIDES.len()
            && STRIDES[last_same_stride_layer] == STRIDES[layer_id]
        {
            anchors_per_cell += ANCHORS_PER_LAYER;
            last_same_stride_layer += 1;
        }

        let stride = STRIDES[layer_id];
        let feature_map_size = INPUT_SIZE.div_ceil(stride);
        for y in 0..feature_map_size {
            for x in 0..feature_map_size {
                let center = PointF32::new(
                    (x as f32 + ANCHOR_OFFSET) / feature_map_size as f32,
                    (y as f32 + ANCHOR_OFFSET) / feature_map_size as f32,
                );
                for _ in 0..anchors_per_cell {
                    anchors.push(center);
                }
            }
        }

        layer_id = last_same_stride_layer;
    }

    anchors
}
