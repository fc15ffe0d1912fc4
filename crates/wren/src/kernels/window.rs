// Window — Sliding K×K window geometry shared by convolution and pooling
//
// Output positions are visited with the outer spatial loop over output dim 2
// and the inner over output dim 1:
//
//   for ay in 0..odim.w      y = -P + ay·S
//     for ax in 0..odim.h    x = -P + ax·S
//
// `x` indexes input dim 1 and `y` input dim 2. Inside a window the taps run
// fy-outer, fx-inner, and taps outside the input are skipped (implicit zero
// padding; no pad tensor is materialized).

use wren_core::ShapeNHWC;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Window {
    pub kernel: usize,
    pub stride: usize,
    pub pad: usize,
}

/// One output position and the input coordinate its window starts at.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Anchor {
    pub ax: usize,
    pub ay: usize,
    pub x: isize,
    pub y: isize,
}

/// One in-range window position.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Tap {
    pub fx: usize,
    pub fy: usize,
    pub ox: usize,
    pub oy: usize,
}

impl Window {
    pub fn new(kernel: usize, stride: usize, pad: usize) -> Self {
        Window {
            kernel,
            stride,
            pad,
        }
    }

    /// Output positions of `odim` in kernel loop order.
    pub fn anchors(self, odim: ShapeNHWC) -> impl Iterator<Item = Anchor> {
        let (s, p) = (self.stride as isize, self.pad as isize);
        (0..odim.w).flat_map(move |ay| {
            (0..odim.h).map(move |ax| Anchor {
                ax,
                ay,
                x: -p + ax as isize * s,
                y: -p + ay as isize * s,
            })
        })
    }

    /// The window positions of `anchor` that fall inside `idim`.
    pub fn taps(self, anchor: Anchor, idim: ShapeNHWC) -> impl Iterator<Item = Tap> {
        let k = self.kernel;
        let (h, w) = (idim.h as isize, idim.w as isize);
        (0..k).flat_map(move |fy| {
            (0..k).filter_map(move |fx| {
                let ox = anchor.x + fx as isize;
                let oy = anchor.y + fy as isize;
                if ox < 0 || oy < 0 || ox >= h || oy >= w {
                    return None;
                }
                Some(Tap {
                    fx,
                    fy,
                    ox: ox as usize,
                    oy: oy as usize,
                })
            })
        })
    }
}
