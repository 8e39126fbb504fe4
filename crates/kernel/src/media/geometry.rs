//! Crop and resize geometry.
//!
//! Pure arithmetic: given the source size, a resize mode and an optional
//! focal point, compute the crop rectangle and the output size. No mode
//! ever upscales beyond the source pixels.

use super::spec::{FocalPoint, ResizeMode};

/// Pixel rectangle inside the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// What to do with the source pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    /// Crop applied before resizing, if any.
    pub crop: Option<Rect>,
    pub width: u32,
    pub height: u32,
}

/// Compute the crop and output size for `mode`.
///
/// `focal` positions fill crops; without one the crop is centred and
/// closeness has no effect.
pub fn plan(src_width: u32, src_height: u32, mode: ResizeMode, focal: Option<FocalPoint>) -> Plan {
    let (sw, sh) = (src_width.max(1), src_height.max(1));
    let whole = |width, height| Plan {
        crop: None,
        width,
        height,
    };

    match mode {
        ResizeMode::Original => whole(sw, sh),
        ResizeMode::Width(w) => {
            let scale = (f64::from(w) / f64::from(sw)).min(1.0);
            let (width, height) = scaled(sw, sh, scale);
            whole(width, height)
        }
        ResizeMode::Height(h) => {
            let scale = (f64::from(h) / f64::from(sh)).min(1.0);
            let (width, height) = scaled(sw, sh, scale);
            whole(width, height)
        }
        ResizeMode::Max { width, height } => {
            let scale = (f64::from(width) / f64::from(sw))
                .min(f64::from(height) / f64::from(sh))
                .min(1.0);
            let (width, height) = scaled(sw, sh, scale);
            whole(width, height)
        }
        ResizeMode::Min { width, height } => {
            let scale = (f64::from(width) / f64::from(sw))
                .max(f64::from(height) / f64::from(sh))
                .min(1.0);
            let (width, height) = scaled(sw, sh, scale);
            whole(width, height)
        }
        ResizeMode::Fill {
            width,
            height,
            closeness,
        } => fill(sw, sh, width, height, closeness, focal),
    }
}

fn scaled(sw: u32, sh: u32, scale: f64) -> (u32, u32) {
    let w = (f64::from(sw) * scale).round().max(1.0) as u32;
    let h = (f64::from(sh) * scale).round().max(1.0) as u32;
    (w.min(sw), h.min(sh))
}

fn fill(sw: u32, sh: u32, tw: u32, th: u32, closeness: u8, focal: Option<FocalPoint>) -> Plan {
    let (swf, shf) = (f64::from(sw), f64::from(sh));
    let aspect = f64::from(tw) / f64::from(th);

    // Largest crop of the target aspect ratio.
    let (max_w, max_h) = if swf / shf > aspect {
        (shf * aspect, shf)
    } else {
        (swf, swf / aspect)
    };

    let point = focal.unwrap_or_else(FocalPoint::centre);
    let (fl, ft, fr, fb) = (
        point.left * swf,
        point.top * shf,
        point.right * swf,
        point.bottom * shf,
    );

    let (crop_w, crop_h) = match focal {
        Some(_) if closeness > 0 => {
            // Smallest crop that keeps the focal rectangle and the output size.
            let min_w = (fr - fl)
                .max((fb - ft) * aspect)
                .max(f64::from(tw))
                .min(max_w);
            let t = f64::from(closeness) / 100.0;
            let w = max_w - (max_w - min_w) * t;
            (w, w / aspect)
        }
        _ => (max_w, max_h),
    };

    let crop_w = (crop_w.round() as u32).clamp(1, sw);
    let crop_h = (crop_h.round() as u32).clamp(1, sh);

    let centre_x = (fl + fr) / 2.0;
    let centre_y = (ft + fb) / 2.0;
    let x = (centre_x - f64::from(crop_w) / 2.0)
        .round()
        .clamp(0.0, f64::from(sw - crop_w)) as u32;
    let y = (centre_y - f64::from(crop_h) / 2.0)
        .round()
        .clamp(0.0, f64::from(sh - crop_h)) as u32;

    let (width, height) = if crop_w >= tw && crop_h >= th {
        (tw, th)
    } else {
        (crop_w, crop_h)
    };

    let crop = Rect {
        x,
        y,
        width: crop_w,
        height: crop_h,
    };
    Plan {
        crop: (crop != Rect {
            x: 0,
            y: 0,
            width: sw,
            height: sh,
        })
        .then_some(crop),
        width,
        height,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn fill_mode(width: u32, height: u32, closeness: u8) -> ResizeMode {
        ResizeMode::Fill {
            width,
            height,
            closeness,
        }
    }

    #[test]
    fn width_keeps_aspect_and_never_upscales() {
        let p = plan(1000, 500, ResizeMode::Width(400), None);
        assert_eq!((p.width, p.height, p.crop), (400, 200, None));
        let p = plan(100, 50, ResizeMode::Width(400), None);
        assert_eq!((p.width, p.height), (100, 50));
    }

    #[test]
    fn height_mode() {
        let p = plan(1000, 500, ResizeMode::Height(100), None);
        assert_eq!((p.width, p.height), (200, 100));
    }

    #[test]
    fn max_fits_inside_box() {
        let p = plan(
            1000,
            500,
            ResizeMode::Max {
                width: 300,
                height: 300,
            },
            None,
        );
        assert_eq!((p.width, p.height), (300, 150));
    }

    #[test]
    fn min_covers_box() {
        let p = plan(
            1000,
            500,
            ResizeMode::Min {
                width: 300,
                height: 300,
            },
            None,
        );
        assert_eq!((p.width, p.height), (600, 300));
    }

    #[test]
    fn fill_centres_without_focal_point() {
        let p = plan(1000, 500, fill_mode(100, 100, 0), None);
        assert_eq!(
            p.crop,
            Some(Rect {
                x: 250,
                y: 0,
                width: 500,
                height: 500
            })
        );
        assert_eq!((p.width, p.height), (100, 100));
    }

    #[test]
    fn fill_follows_focal_point_and_clamps_to_edges() {
        let focal = FocalPoint::new(0.0, 0.0, 0.1, 0.2).unwrap();
        let p = plan(1000, 500, fill_mode(100, 100, 0), Some(focal));
        assert_eq!(p.crop.unwrap().x, 0);

        let focal = FocalPoint::new(0.8, 0.4, 0.9, 0.6).unwrap();
        let p = plan(1000, 500, fill_mode(100, 100, 0), Some(focal));
        let crop = p.crop.unwrap();
        assert_eq!(crop.x + crop.width, 1000);
        assert_eq!(crop.x, 500);
    }

    #[test]
    fn closeness_zooms_without_cutting_focal_rect() {
        let focal = FocalPoint::new(0.4, 0.4, 0.6, 0.6).unwrap();
        let p = plan(1000, 1000, fill_mode(100, 100, 100), Some(focal));
        let crop = p.crop.unwrap();
        assert_eq!((crop.width, crop.height), (200, 200));
        assert_eq!((crop.x, crop.y), (400, 400));

        let p = plan(1000, 1000, fill_mode(100, 100, 50), Some(focal));
        assert_eq!(p.crop.unwrap().width, 600);
    }

    #[test]
    fn closeness_ignored_without_focal_point() {
        let p = plan(1000, 1000, fill_mode(100, 100, 100), None);
        assert_eq!(p.crop, None);
        assert_eq!((p.width, p.height), (100, 100));
    }

    #[test]
    fn fill_does_not_upscale_small_sources() {
        let p = plan(50, 40, fill_mode(200, 100, 0), None);
        let crop = p.crop.unwrap();
        assert_eq!((crop.width, crop.height), (50, 25));
        assert_eq!((p.width, p.height), (50, 25));
    }
}
