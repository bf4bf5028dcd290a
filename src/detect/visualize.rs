use crate::frame::Frame;

use super::result::Predictions;

const LINE_WIDTH: u32 = 2;

// Fixed palette, cycled by class id.
const PALETTE: [[u8; 3]; 8] = [
    [230, 25, 75],
    [60, 180, 75],
    [255, 225, 25],
    [0, 130, 200],
    [245, 130, 48],
    [145, 30, 180],
    [70, 240, 240],
    [240, 50, 230],
];

pub fn class_color(class_id: u32) -> [u8; 3] {
    PALETTE[class_id as usize % PALETTE.len()]
}

/// Draw box outlines for every instance onto a copy of `frame`.
/// The copy keeps the input channel order.
pub fn draw_instances(frame: &Frame, predictions: &Predictions) -> Frame {
    let mut out = frame.clone();
    if out.width == 0 || out.height == 0 {
        return out;
    }
    for instance in &predictions.instances {
        let bbox = instance.bbox.clip(out.width, out.height);
        let max_x = out.width - 1;
        let max_y = out.height - 1;
        let x1 = (bbox.x1.floor() as u32).min(max_x);
        let y1 = (bbox.y1.floor() as u32).min(max_y);
        let x2 = (bbox.x2.ceil() as u32).min(max_x);
        let y2 = (bbox.y2.ceil() as u32).min(max_y);
        if x2 < x1 || y2 < y1 {
            continue;
        }
        let color = class_color(instance.class_id);
        for t in 0..LINE_WIDTH {
            for x in x1..=x2 {
                out.put_rgb(x, y1.saturating_add(t).min(y2), color);
                out.put_rgb(x, y2.saturating_sub(t).max(y1), color);
            }
            for y in y1..=y2 {
                out.put_rgb(x1.saturating_add(t).min(x2), y, color);
                out.put_rgb(x2.saturating_sub(t).max(x1), y, color);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::{BoundingBox, Instance};
    use crate::frame::ChannelOrder;

    #[test]
    fn outlines_box_without_filling_it() {
        let frame = Frame::filled(20, 20, ChannelOrder::Rgb, [0, 0, 0]);
        let preds = Predictions {
            instances: vec![Instance {
                bbox: BoundingBox::new(2.0, 2.0, 15.0, 15.0),
                score: 0.9,
                class_id: 1,
            }],
            image_width: 20,
            image_height: 20,
        };
        let drawn = draw_instances(&frame, &preds);
        assert_eq!(drawn.pixel(2, 2), Some(class_color(1)));
        assert_eq!(drawn.pixel(15, 8), Some(class_color(1)));
        assert_eq!(drawn.pixel(8, 8), Some([0, 0, 0]));
        assert_eq!(drawn.pixel(0, 0), Some([0, 0, 0]));
        // The source is untouched.
        assert_eq!(frame.pixel(2, 2), Some([0, 0, 0]));
    }

    #[test]
    fn keeps_bgr_order() {
        let frame = Frame::filled(8, 8, ChannelOrder::Bgr, [0, 0, 0]);
        let preds = Predictions {
            instances: vec![Instance {
                bbox: BoundingBox::new(0.0, 0.0, 7.0, 7.0),
                score: 0.9,
                class_id: 0,
            }],
            image_width: 8,
            image_height: 8,
        };
        let drawn = draw_instances(&frame, &preds);
        let [r, g, b] = class_color(0);
        assert_eq!(drawn.order, ChannelOrder::Bgr);
        assert_eq!(drawn.pixel(0, 0), Some([b, g, r]));
    }
}
