use anyhow::anyhow;

/// Device and queue the renderer records and submits its passes on.
///
/// Rendering is offscreen only, so no surface is involved. Callers that already
/// own a device can build the context with [`Context::from_parts`].
#[derive(Debug, Clone)]
pub struct Context {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl Context {
    /**
     * Requests an adapter and device without a surface.
     *
     * Line polygon mode is requested when the adapter offers it; wireframe
     * drawing degrades to filled polygons otherwise.
     */
    pub async fn new() -> anyhow::Result<Self> {
        // The instance is a handle to our GPU
        // BackendBit::PRIMARY => Vulkan + Metal + DX12 + Browser WebGPU
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..wgpu::InstanceDescriptor::new_without_display_handle()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| anyhow!("no compatible GPU adapter: {e}"))?;
        log::info!("using adapter {:?}", adapter.get_info());

        let required_features = adapter.features() & wgpu::Features::POLYGON_MODE_LINE;
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("pbr-ngin device"),
                required_features,
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
                trace: wgpu::Trace::Off,
                ..Default::default()
            })
            .await
            .map_err(|e| anyhow!("device creation failed: {e}"))?;

        Ok(Self::from_parts(device, queue))
    }

    /// Blocking variant of [`Context::new`].
    pub fn headless() -> anyhow::Result<Self> {
        futures::executor::block_on(Self::new())
    }

    pub fn from_parts(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        device.on_uncaptured_error(std::sync::Arc::new(|e| {
            log::error!("uncaptured wgpu error: {e}");
        }));
        log::info!("device features: {:?}", device.features());
        Self { device, queue }
    }
}
