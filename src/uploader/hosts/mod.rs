// One module per supported image host

pub mod chevereto_v3;
pub mod chevereto_v4;
pub mod imgbb;
pub mod imgbox;
pub mod ptpimg;

pub use chevereto_v3::CheveretoV3Backend;
pub use chevereto_v4::CheveretoV4Backend;
pub use imgbb::ImgBbBackend;
pub use imgbox::{Gallery, GalleryProvider, GallerySettings, ImgBoxBackend, Submission};
pub use ptpimg::PtpImgBackend;
