//! Ember viewer.
//!
//! Opens a window and clears it every frame, rebuilding the swapchain on
//! resize or when presentation reports it out of date.

use anyhow::{anyhow, Context};
use ash::vk;
use ember_gpu::{
    AcquireOutcome, CommandBuffer, CommandPoolId, DeviceRequirements, Framebuffer, FrameSync,
    GraphicsContext, GraphicsDevice, RenderPass, SwapchainConfig, DEFAULT_FENCE_TIMEOUT_NS,
};
use ember_platform::{PlatformConfig, Window};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

const FRAMES_IN_FLIGHT: usize = 2;
const CLEAR_COLOR: [f32; 4] = [0.05, 0.07, 0.12, 1.0];

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = PlatformConfig::new("Ember Viewer");
    info!("{} starting...", config.title);

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut viewer = Viewer {
        config,
        state: None,
        failure: None,
    };
    event_loop.run_app(&mut viewer)?;

    match viewer.failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

struct Viewer {
    config: PlatformConfig,
    state: Option<ViewerState>,
    failure: Option<anyhow::Error>,
}

impl Viewer {
    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("{e:#}");
        self.state = None;
        self.failure = Some(e);
        event_loop.exit();
    }
}

struct Frame {
    sync: FrameSync,
    command_buffer: CommandBuffer,
}

/// Everything the loop needs. Field order is drop order.
struct ViewerState {
    frames: Vec<Frame>,
    framebuffers: Vec<Framebuffer>,
    render_pass: RenderPass,
    pool: CommandPoolId,
    device: GraphicsDevice,
    _context: GraphicsContext,
    window: Window,
    frame_index: usize,
    needs_rebuild: bool,
}

impl ViewerState {
    fn new(event_loop: &ActiveEventLoop, config: &PlatformConfig) -> anyhow::Result<Self> {
        let window = Window::create(event_loop, config)?;
        let context = GraphicsContext::initialize(&config.title, &window)?;

        let swapchain_config = SwapchainConfig {
            vsync: config.vsync,
            ..SwapchainConfig::default()
        };
        let mut device =
            context.create_graphics_device(&DeviceRequirements::default(), swapchain_config)?;

        let pool = device.create_command_pool(
            device.graphics_queue().family_index(),
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )?;
        let command_buffers = device
            .command_pool_mut(pool)?
            .allocate(vk::CommandBufferLevel::PRIMARY, FRAMES_IN_FLIGHT as u32)?;

        let frames = command_buffers
            .into_iter()
            .map(|command_buffer| {
                Ok(Frame {
                    sync: FrameSync::new(device.logical_device())?,
                    command_buffer,
                })
            })
            .collect::<ember_gpu::Result<Vec<_>>>()?;

        let render_pass = device.create_swapchain_render_pass()?;
        let framebuffers = device.create_swapchain_framebuffers(&render_pass)?;

        Ok(Self {
            frames,
            framebuffers,
            render_pass,
            pool,
            device,
            _context: context,
            window,
            frame_index: 0,
            needs_rebuild: false,
        })
    }

    fn rebuild(&mut self) -> anyhow::Result<()> {
        self.device.wait_idle()?;
        self.framebuffers.clear();

        let size = self.window.inner_size();
        if self.device.recreate_swapchain(size.width, size.height)? {
            self.render_pass = self.device.create_swapchain_render_pass()?;
        }
        self.framebuffers = self.device.create_swapchain_framebuffers(&self.render_pass)?;
        self.needs_rebuild = false;
        Ok(())
    }

    fn draw_frame(&mut self) -> anyhow::Result<()> {
        if self.needs_rebuild {
            self.rebuild()?;
        }

        let frame = &self.frames[self.frame_index];
        frame.sync.in_flight.wait(DEFAULT_FENCE_TIMEOUT_NS)?;

        let image_index = match self
            .device
            .acquire_next_image(&frame.sync.image_available, None)?
        {
            AcquireOutcome::Acquired(index) => index,
            AcquireOutcome::Suboptimal(index) => {
                self.needs_rebuild = true;
                index
            }
            AcquireOutcome::OutOfDate => {
                self.needs_rebuild = true;
                return Ok(());
            }
        };
        frame.sync.in_flight.reset()?;

        let extent = self.device.swapchain()?.extent();
        let framebuffer = self
            .framebuffers
            .get(image_index as usize)
            .ok_or_else(|| anyhow!("no framebuffer for swapchain image {image_index}"))?;

        let pool = self.device.command_pool(self.pool)?;
        let recorder = pool.recorder(frame.command_buffer)?;
        recorder.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: CLEAR_COLOR,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        recorder.begin_render_pass(
            &self.render_pass,
            framebuffer,
            vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            },
            &clear_values,
            vk::SubpassContents::INLINE,
        );
        recorder.end_render_pass();
        recorder.end()?;

        let wait_semaphores = [frame.sync.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [recorder.raw()];
        let signal_semaphores = [frame.sync.render_finished.handle()];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);
        self.device
            .graphics_queue()
            .submit_batch(&[submit], Some(&frame.sync.in_flight))?;

        let swapchains = [self.device.swapchain()?.handle()];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&signal_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match self.device.present_queue().present(&present_info) {
            vk::Result::SUCCESS => {}
            vk::Result::SUBOPTIMAL_KHR | vk::Result::ERROR_OUT_OF_DATE_KHR => {
                self.needs_rebuild = true;
            }
            other => return Err(anyhow!("vkQueuePresentKHR failed: {other}")),
        }

        self.frame_index = (self.frame_index + 1) % self.frames.len();
        Ok(())
    }
}

impl Drop for ViewerState {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle: {e}");
        }
    }
}

impl ApplicationHandler for Viewer {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        match ViewerState::new(event_loop, &self.config) {
            Ok(state) => {
                info!("Viewer ready");
                self.state = Some(state);
            }
            Err(e) => self.fail(event_loop, e.context("Failed to initialize viewer")),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(state) = &mut self.state else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                self.state = None;
                event_loop.exit();
            }
            WindowEvent::Resized(_) => {
                state.needs_rebuild = true;
            }
            WindowEvent::RedrawRequested => {
                let size = state.window.inner_size();
                if size.width == 0 || size.height == 0 {
                    return;
                }
                if let Err(e) = state.draw_frame() {
                    self.fail(event_loop, e);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.window.request_redraw();
        }
    }
}
