use image::DynamicImage;
use image::imageops::FilterType;
use ndarray::Array4;

/// Resizes to the classifier resolution and scales channels to [0, 1].
///
/// The result is laid out NCHW with a batch of one.
pub fn to_input_tensor(image: &DynamicImage, input_size: (u32, u32)) -> Array4<f32> {
    let (width, height) = input_size;
    let resized = image.resize_exact(width, height, FilterType::Triangle).to_rgb8();

    Array4::from_shape_fn(
        (1, 3, height as usize, width as usize),
        |(_, channel, y, x)| f32::from(resized.get_pixel(x as u32, y as u32)[channel]) / 255.0,
    )
}
