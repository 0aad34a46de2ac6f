// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! `blog.BlogService`: CRUD over a document store plus a streaming listing.
//!
//! The store is handed to [`BlogService::new`]; handlers never reach for
//! shared global state. Store errors are reported as `Internal`, a malformed
//! id as `InvalidArgument` and a missing document as `NotFound`.

use std::sync::Arc;

use tracing::{error, info};

use courier_rpc::{
    CallContext, CallOptions, Client, MethodDescriptor, ResponseSink, RpcError, ServiceRegistry,
    Shape, Status, bincode_codec,
};
use courier_store::{DocumentStore, ObjectId, StoreError};

pub const SERVICE: &str = "blog.BlogService";

pub const CREATE_BLOG: MethodDescriptor = MethodDescriptor::new(SERVICE, "CreateBlog", Shape::Unary);
pub const READ_BLOG: MethodDescriptor = MethodDescriptor::new(SERVICE, "ReadBlog", Shape::Unary);
pub const UPDATE_BLOG: MethodDescriptor = MethodDescriptor::new(SERVICE, "UpdateBlog", Shape::Unary);
pub const DELETE_BLOG: MethodDescriptor = MethodDescriptor::new(SERVICE, "DeleteBlog", Shape::Unary);
pub const LIST_BLOG: MethodDescriptor =
    MethodDescriptor::new(SERVICE, "ListBlog", Shape::ServerStream);

/// Blog as exchanged on the wire. `id` is the text form of an
/// [`ObjectId`], empty on creation.
#[derive(Debug, Clone, PartialEq, Default, bincode::Encode, bincode::Decode)]
pub struct Blog {
    pub id: String,
    pub author_id: String,
    pub title: String,
    pub content: String,
}

/// Blog as kept in the store.
#[derive(Debug, Clone, PartialEq)]
pub struct BlogItem {
    pub author_id: String,
    pub title: String,
    pub content: String,
}

impl BlogItem {
    fn from_blog(blog: Blog) -> Self {
        Self {
            author_id: blog.author_id,
            title: blog.title,
            content: blog.content,
        }
    }

    fn into_blog(self, id: &ObjectId) -> Blog {
        Blog {
            id: id.to_string(),
            author_id: self.author_id,
            title: self.title,
            content: self.content,
        }
    }
}

#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct CreateBlogRequest {
    pub blog: Blog,
}

#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct CreateBlogResponse {
    pub blog: Blog,
}

#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct ReadBlogRequest {
    pub blog_id: String,
}

#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct ReadBlogResponse {
    pub blog: Blog,
}

#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct UpdateBlogRequest {
    pub blog: Blog,
}

#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct UpdateBlogResponse {
    pub blog: Blog,
}

#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct DeleteBlogRequest {
    pub blog_id: String,
}

#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct DeleteBlogResponse {
    pub blog_id: String,
}

/// Page of the listing; `limit` 0 lists everything after `offset`.
#[derive(Debug, Clone, PartialEq, Default, bincode::Encode, bincode::Decode)]
pub struct ListBlogRequest {
    pub offset: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct ListBlogResponse {
    pub blog: Blog,
}

bincode_codec!(
    CreateBlogRequest,
    CreateBlogResponse,
    ReadBlogRequest,
    ReadBlogResponse,
    UpdateBlogRequest,
    UpdateBlogResponse,
    DeleteBlogRequest,
    DeleteBlogResponse,
    ListBlogRequest,
    ListBlogResponse,
);

fn parse_id(id: &str) -> Result<ObjectId, Status> {
    id.parse()
        .map_err(|e: StoreError| Status::invalid_argument(e.to_string()))
}

fn not_found(id: &ObjectId) -> Status {
    Status::not_found(format!("no blog found with id '{id}'"))
}

fn store_failure(operation: &str, e: StoreError) -> Status {
    error!(operation, error = %e, "store failure");
    Status::internal(format!("{operation} failed: {e}"))
}

pub struct BlogService {
    store: Arc<dyn DocumentStore<BlogItem>>,
}

impl std::fmt::Debug for BlogService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlogService").finish_non_exhaustive()
    }
}

impl BlogService {
    pub fn new(store: Arc<dyn DocumentStore<BlogItem>>) -> Self {
        Self { store }
    }

    pub async fn create_blog(
        &self,
        request: CreateBlogRequest,
    ) -> Result<CreateBlogResponse, Status> {
        let item = BlogItem::from_blog(request.blog);
        let id = self
            .store
            .insert(item.clone())
            .await
            .map_err(|e| store_failure("insert", e))?;
        info!(%id, "blog created");
        Ok(CreateBlogResponse {
            blog: item.into_blog(&id),
        })
    }

    pub async fn read_blog(&self, request: ReadBlogRequest) -> Result<ReadBlogResponse, Status> {
        let id = parse_id(&request.blog_id)?;
        info!(%id, "reading blog");
        let item = self
            .store
            .find_by_id(&id)
            .await
            .map_err(|e| store_failure("find", e))?
            .ok_or_else(|| not_found(&id))?;
        Ok(ReadBlogResponse {
            blog: item.into_blog(&id),
        })
    }

    /// Replaces the stored fields and returns the blog as stored.
    pub async fn update_blog(
        &self,
        request: UpdateBlogRequest,
    ) -> Result<UpdateBlogResponse, Status> {
        let id = parse_id(&request.blog.id)?;
        info!(%id, "updating blog");
        let item = BlogItem::from_blog(request.blog);
        let matched = self
            .store
            .replace_by_id(&id, item)
            .await
            .map_err(|e| store_failure("replace", e))?;
        if matched == 0 {
            return Err(not_found(&id));
        }

        let stored = self
            .store
            .find_by_id(&id)
            .await
            .map_err(|e| store_failure("find", e))?
            .ok_or_else(|| not_found(&id))?;
        Ok(UpdateBlogResponse {
            blog: stored.into_blog(&id),
        })
    }

    pub async fn delete_blog(
        &self,
        request: DeleteBlogRequest,
    ) -> Result<DeleteBlogResponse, Status> {
        let id = parse_id(&request.blog_id)?;
        let deleted = self
            .store
            .delete_by_id(&id)
            .await
            .map_err(|e| store_failure("delete", e))?;
        if deleted == 0 {
            info!(%id, "no blog to delete");
            return Err(not_found(&id));
        }
        info!(%id, "blog deleted");
        Ok(DeleteBlogResponse {
            blog_id: id.to_string(),
        })
    }

    pub async fn list_blog(
        &self,
        request: ListBlogRequest,
        sink: ResponseSink<ListBlogResponse>,
    ) -> Result<(), Status> {
        let offset = usize::try_from(request.offset).unwrap_or(usize::MAX);
        let limit = match request.limit {
            0 => None,
            limit => Some(usize::try_from(limit).unwrap_or(usize::MAX)),
        };

        let page = self
            .store
            .list(offset, limit)
            .await
            .map_err(|e| store_failure("list", e))?;
        info!(count = page.len(), offset, ?limit, "listing blogs");
        for (id, item) in page {
            sink.send(ListBlogResponse {
                blog: item.into_blog(&id),
            })
            .await?;
        }
        Ok(())
    }

    pub fn register(self: Arc<Self>, registry: &mut ServiceRegistry) -> Result<(), RpcError> {
        let service = self.clone();
        registry.register_unary(&CREATE_BLOG, move |request: CreateBlogRequest, _ctx: CallContext| {
            let service = service.clone();
            async move { service.create_blog(request).await }
        })?;

        let service = self.clone();
        registry.register_unary(&READ_BLOG, move |request: ReadBlogRequest, _ctx: CallContext| {
            let service = service.clone();
            async move { service.read_blog(request).await }
        })?;

        let service = self.clone();
        registry.register_unary(&UPDATE_BLOG, move |request: UpdateBlogRequest, _ctx: CallContext| {
            let service = service.clone();
            async move { service.update_blog(request).await }
        })?;

        let service = self.clone();
        registry.register_unary(&DELETE_BLOG, move |request: DeleteBlogRequest, _ctx: CallContext| {
            let service = service.clone();
            async move { service.delete_blog(request).await }
        })?;

        let service = self;
        registry.register_server_stream(
            &LIST_BLOG,
            move |request: ListBlogRequest, sink: ResponseSink<ListBlogResponse>, _ctx: CallContext| {
                let service = service.clone();
                async move { service.list_blog(request, sink).await }
            },
        )?;

        Ok(())
    }
}

/// Typed client for the blog service.
#[derive(Debug, Clone)]
pub struct BlogClient {
    client: Client,
}

impl BlogClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn create_blog(&self, blog: Blog, options: CallOptions) -> Result<Blog, Status> {
        let response: CreateBlogResponse = self
            .client
            .unary(&CREATE_BLOG, CreateBlogRequest { blog }, options)
            .await?;
        Ok(response.blog)
    }

    pub async fn read_blog(&self, blog_id: &str, options: CallOptions) -> Result<Blog, Status> {
        let request = ReadBlogRequest {
            blog_id: blog_id.to_string(),
        };
        let response: ReadBlogResponse = self.client.unary(&READ_BLOG, request, options).await?;
        Ok(response.blog)
    }

    pub async fn update_blog(&self, blog: Blog, options: CallOptions) -> Result<Blog, Status> {
        let response: UpdateBlogResponse = self
            .client
            .unary(&UPDATE_BLOG, UpdateBlogRequest { blog }, options)
            .await?;
        Ok(response.blog)
    }

    /// Returns the id of the deleted blog.
    pub async fn delete_blog(&self, blog_id: &str, options: CallOptions) -> Result<String, Status> {
        let request = DeleteBlogRequest {
            blog_id: blog_id.to_string(),
        };
        let response: DeleteBlogResponse =
            self.client.unary(&DELETE_BLOG, request, options).await?;
        Ok(response.blog_id)
    }

    pub async fn list_blog(
        &self,
        request: ListBlogRequest,
        options: CallOptions,
        mut on_blog: impl FnMut(Blog),
    ) -> Result<(), Status> {
        let mut call = self
            .client
            .open_server_stream::<ListBlogRequest, ListBlogResponse>(&LIST_BLOG, options)
            .await?;
        call.send_one(request).await?;
        while let Some(response) = call.receive().await? {
            on_blog(response.blog);
        }
        Ok(())
    }
}
