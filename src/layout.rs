//! Page geometry and image placement.
//!
//! Offsets in [`Placement`] are measured from the top-left corner of the page,
//! y growing downwards. [`Placement::pdf_origin`] converts them into PDF user
//! space where the origin is the bottom-left corner.

use crate::config::MergeConfig;
use crate::error::Result;
use crate::parse::PageSize;

/// page dimensions in points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSpec {
    pub width: f64,
    pub height: f64,
}

impl PageSpec {
    pub fn new(width: f64, height: f64) -> Self {
        PageSpec { width, height }
    }

    /// swap width and height
    pub fn rotated(self) -> Self {
        PageSpec {
            width: self.height,
            height: self.width,
        }
    }
}

/// pixel dimensions of a decoded image
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageSpec {
    pub width: f64,
    pub height: f64,
}

impl ImageSpec {
    pub fn new(width: u32, height: u32) -> Self {
        ImageSpec {
            width: width as f64,
            height: height as f64,
        }
    }
}

impl From<ImageSpec> for PageSpec {
    fn from(image: ImageSpec) -> Self {
        PageSpec::new(image.width, image.height)
    }
}

/// where and how large an image is drawn on its page
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub draw_width: f64,
    pub draw_height: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

impl Placement {
    /// lower-left corner of the drawn image in PDF user space
    pub fn pdf_origin(&self, page: PageSpec) -> (f64, f64) {
        (
            self.offset_x,
            page.height - self.offset_y - self.draw_height,
        )
    }
}

/// How page sizes are chosen for a document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PagePolicy {
    /// every page matches its image
    Free,
    /// every page has the same size
    Fixed(PageSpec),
}

impl PagePolicy {
    /// Resolve the document-level page policy.
    ///
    /// Explicit width and height win over the named size; both must be
    /// positive. Landscape swaps the resolved size and is ignored in free mode.
    pub fn from_config(config: &MergeConfig) -> Result<Self> {
        if config.free {
            return Ok(PagePolicy::Free);
        }
        let page = if config.has_explicit_size() {
            PageSpec::new(config.width, config.height)
        } else {
            config.size.parse::<PageSize>()?.page_spec()
        };
        Ok(PagePolicy::Fixed(if config.landscape {
            page.rotated()
        } else {
            page
        }))
    }

    pub fn is_free(&self) -> bool {
        matches!(self, PagePolicy::Free)
    }

    /// page size for one image
    pub fn page_for(&self, image: ImageSpec) -> PageSpec {
        match self {
            PagePolicy::Free => image.into(),
            PagePolicy::Fixed(page) => *page,
        }
    }

    /// page size and image placement for one image
    pub fn layout(&self, image: ImageSpec) -> (PageSpec, Placement) {
        let page = self.page_for(image);
        (page, place(page, image, self.is_free()))
    }
}

/// Scale `image` uniformly so it fits inside `page` and center it.
///
/// The image is first stretched to the page height; if that overflows the
/// page width it is clamped on width instead. An exact fit clamps on height.
/// In free mode the image is drawn at its natural size at the origin.
pub fn place(page: PageSpec, image: ImageSpec, free: bool) -> Placement {
    if free {
        return Placement {
            draw_width: image.width,
            draw_height: image.height,
            offset_x: 0.0,
            offset_y: 0.0,
        };
    }

    let iw = image.width / image.height * page.height;
    if iw > page.width {
        let draw_height = image.height / image.width * page.width;
        Placement {
            draw_width: page.width,
            draw_height,
            offset_x: 0.0,
            offset_y: (page.height - draw_height) / 2.0,
        }
    } else {
        Placement {
            draw_width: iw,
            draw_height: page.height,
            offset_x: (page.width - iw) / 2.0,
            offset_y: 0.0,
        }
    }
}
