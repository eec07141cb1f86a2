// ============================================================================
// GPU COMPUTE — pipelines for the adjustment kernels, upload and readback
// ============================================================================

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use super::context::GpuContext;
use super::shaders;
use crate::error::EngineError;
use crate::ops::filters::build_gaussian_kernel;

// ============================================================================
// SHARED HELPERS
// ============================================================================

fn extent(w: u32, h: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: w,
        height: h,
        depth_or_array_layers: 1,
    }
}

fn create_rw_texture(device: &wgpu::Device, w: u32, h: u32, label: &str) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: extent(w, h),
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::STORAGE_BINDING
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    })
}

fn upload_rgba(ctx: &GpuContext, data: &[u8], w: u32, h: u32, label: &str) -> wgpu::Texture {
    let tex = ctx.device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: extent(w, h),
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    ctx.queue.write_texture(
        wgpu::ImageCopyTexture {
            texture: &tex,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        data,
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(4 * w),
            rows_per_image: Some(h),
        },
        extent(w, h),
    );
    tex
}

fn aligned_bytes_per_row(width: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    (width * 4).div_ceil(align) * align
}

/// Copy a texture into a mappable buffer and block until the map completes.
/// Nothing is returned before the device has finished every submitted pass,
/// so callers never see a partially written result.
pub fn readback_texture(
    ctx: &GpuContext,
    texture: &wgpu::Texture,
    width: u32,
    height: u32,
) -> Result<Vec<u8>, EngineError> {
    let bytes_per_row = aligned_bytes_per_row(width);
    let staging = ctx.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback_staging"),
        size: bytes_per_row as u64 * height as u64,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    ctx.submit_checked("readback_encoder", |encoder| {
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            extent(width, height),
        );
    })?;

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    ctx.device.poll(wgpu::Maintain::Wait);
    match rx.recv() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            return Err(EngineError::BackendUnavailable(format!("readback map failed: {}", e)));
        }
        Err(e) => {
            return Err(EngineError::BackendUnavailable(format!("readback channel closed: {}", e)));
        }
    }

    let row = width as usize * 4;
    let mut result = Vec::with_capacity(row * height as usize);
    {
        let mapped = slice.get_mapped_range();
        for y in 0..height as usize {
            let start = y * bytes_per_row as usize;
            result.extend_from_slice(&mapped[start..start + row]);
        }
    }
    staging.unmap();
    Ok(result)
}

// ============================================================================
// FILTER PIPELINE — input texture, output storage texture, uniform params,
// optional read-only storage buffer
// ============================================================================

struct FilterPipeline {
    pipeline: wgpu::ComputePipeline,
    bgl: wgpu::BindGroupLayout,
    label: &'static str,
}

impl FilterPipeline {
    fn new(
        device: &wgpu::Device,
        label: &'static str,
        source: &str,
        entry_point: &str,
        with_storage: bool,
    ) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let mut entries = vec![
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::StorageTexture {
                    access: wgpu::StorageTextureAccess::WriteOnly,
                    format: wgpu::TextureFormat::Rgba8Unorm,
                    view_dimension: wgpu::TextureViewDimension::D2,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ];
        if with_storage {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: 3,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: true },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            });
        }

        let bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries: &entries,
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[&bgl],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: Some(&layout),
            module: &shader,
            entry_point,
            compilation_options: Default::default(),
        });
        Self {
            pipeline,
            bgl,
            label,
        }
    }

    /// Record one 16×16-workgroup dispatch from `src` into `dst`.
    fn record(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        src: &wgpu::Texture,
        dst: &wgpu::Texture,
        params: &[u8],
        storage: Option<&wgpu::Buffer>,
        (w, h): (u32, u32),
    ) {
        let params_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(self.label),
            contents: params,
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let src_view = src.create_view(&wgpu::TextureViewDescriptor::default());
        let dst_view = dst.create_view(&wgpu::TextureViewDescriptor::default());

        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&src_view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::TextureView(&dst_view),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: params_buf.as_entire_binding(),
            },
        ];
        if let Some(buf) = storage {
            entries.push(wgpu::BindGroupEntry {
                binding: 3,
                resource: buf.as_entire_binding(),
            });
        }
        let bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(self.label),
            layout: &self.bgl,
            entries: &entries,
        });

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(self.label),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &bg, &[]);
        pass.dispatch_workgroups(w.div_ceil(16), h.div_ceil(16), 1);
    }

    /// Upload, run once, read back.
    fn run_once(&self, ctx: &GpuContext, data: &[u8], w: u32, h: u32, params: &[u8]) -> Result<Vec<u8>, EngineError> {
        let src = upload_rgba(ctx, data, w, h, "filter_src");
        let dst = create_rw_texture(&ctx.device, w, h, "filter_dst");
        ctx.submit_checked(self.label, |encoder| {
            self.record(&ctx.device, encoder, &src, &dst, params, None, (w, h));
        })?;
        readback_texture(ctx, &dst, w, h)
    }
}

// ============================================================================
// UNIFORMS
// ============================================================================

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct BcParams {
    width: u32,
    height: u32,
    brightness: f32,
    contrast: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct BalanceParams {
    width: u32,
    height: u32,
    bias: f32,
    luma_shift: f32,
    gains: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct BlurParams {
    width: u32,
    height: u32,
    radius: u32,
    direction: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct MedianParams {
    width: u32,
    height: u32,
    radius: u32,
    _pad: u32,
}

// ============================================================================
// ADJUSTMENT PIPELINES
// ============================================================================

pub struct GpuPipelines {
    brightness_contrast: FilterPipeline,
    color_balance: FilterPipeline,
    blur: FilterPipeline,
    median: FilterPipeline,
}

impl GpuPipelines {
    pub fn new(device: &wgpu::Device) -> Self {
        Self {
            brightness_contrast: FilterPipeline::new(
                device,
                "brightness_contrast",
                shaders::BRIGHTNESS_CONTRAST_SHADER,
                "cs_brightness_contrast",
                false,
            ),
            color_balance: FilterPipeline::new(
                device,
                "color_balance",
                shaders::COLOR_BALANCE_SHADER,
                "cs_color_balance",
                false,
            ),
            blur: FilterPipeline::new(device, "separable_blur", shaders::SEPARABLE_BLUR_SHADER, "cs_blur", true),
            median: FilterPipeline::new(device, "median", shaders::MEDIAN_SHADER, "cs_median", false),
        }
    }

    pub fn brightness_contrast(
        &self,
        ctx: &GpuContext,
        data: &[u8],
        w: u32,
        h: u32,
        brightness: f32,
        contrast: f32,
    ) -> Result<Vec<u8>, EngineError> {
        let params = BcParams {
            width: w,
            height: h,
            brightness,
            contrast,
        };
        self.brightness_contrast
            .run_once(ctx, data, w, h, bytemuck::bytes_of(&params))
    }

    pub fn color_balance(
        &self,
        ctx: &GpuContext,
        data: &[u8],
        w: u32,
        h: u32,
        gains: [f32; 3],
        bias: f32,
        luma_shift: f32,
    ) -> Result<Vec<u8>, EngineError> {
        let params = BalanceParams {
            width: w,
            height: h,
            bias,
            luma_shift,
            gains: [gains[0], gains[1], gains[2], 1.0],
        };
        self.color_balance
            .run_once(ctx, data, w, h, bytemuck::bytes_of(&params))
    }

    /// Horizontal then vertical pass in one submission, same kernel as the CPU blur.
    pub fn gaussian_blur(&self, ctx: &GpuContext, data: &[u8], w: u32, h: u32, radius: u32) -> Result<Vec<u8>, EngineError> {
        let kernel = build_gaussian_kernel(radius);
        let weights = ctx.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("blur_weights"),
            contents: bytemuck::cast_slice(&kernel),
            usage: wgpu::BufferUsages::STORAGE,
        });

        let src = upload_rgba(ctx, data, w, h, "blur_src");
        let tmp = create_rw_texture(&ctx.device, w, h, "blur_tmp");
        let dst = create_rw_texture(&ctx.device, w, h, "blur_dst");

        let pass_params = |direction| BlurParams {
            width: w,
            height: h,
            radius,
            direction,
        };
        ctx.submit_checked("blur_encoder", |encoder| {
            self.blur.record(
                &ctx.device,
                encoder,
                &src,
                &tmp,
                bytemuck::bytes_of(&pass_params(0)),
                Some(&weights),
                (w, h),
            );
            self.blur.record(
                &ctx.device,
                encoder,
                &tmp,
                &dst,
                bytemuck::bytes_of(&pass_params(1)),
                Some(&weights),
                (w, h),
            );
        })?;
        readback_texture(ctx, &dst, w, h)
    }

    pub fn median(&self, ctx: &GpuContext, data: &[u8], w: u32, h: u32, radius: u32) -> Result<Vec<u8>, EngineError> {
        let params = MedianParams {
            width: w,
            height: h,
            radius,
            _pad: 0,
        };
        self.median.run_once(ctx, data, w, h, bytemuck::bytes_of(&params))
    }
}
